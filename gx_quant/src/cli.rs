use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    Command,
};

use anyhow::Context;

use utils::{init_log, LogLevel};

use crate::{
    annotation::{FeatureSpec, DEFAULT_FEATURE_TYPE},
    assign::{ReadFilter, StrandSpec, DEFAULT_MIN_MAPQ},
    config::Config,
    error::ParsePolicy,
    normalize::Method,
};

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("warn")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help("Set number of assignment threads [default: available cores]"),
        )
        .arg(
            Arg::new("feature_type")
                .short('f')
                .long("feature-type")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .default_value(DEFAULT_FEATURE_TYPE)
                .help("Annotation feature type (column 3) to count reads against"),
        )
        .arg(
            Arg::new("id")
                .short('i')
                .long("id")
                .value_parser(value_parser!(String))
                .value_name("ATTRIBUTE")
                .help("Take gene names from this attribute (i.e., gene_id) [default: use column 1]"),
        )
        .arg(
            Arg::new("mapq")
                .short('Q')
                .long("min-mapq")
                .value_parser(value_parser!(u8))
                .value_name("MAPQ")
                .help(format!(
                    "Minimum mapping quality for a read to be counted [default: {}]",
                    DEFAULT_MIN_MAPQ
                )),
        )
        .arg(
            Arg::new("with_secondary")
                .long("with-secondary")
                .action(ArgAction::SetTrue)
                .help("Count secondary alignments"),
        )
        .arg(
            Arg::new("with_supplementary")
                .long("with-supplementary")
                .action(ArgAction::SetTrue)
                .help("Count supplementary alignments"),
        )
        .arg(
            Arg::new("with_nonunique")
                .long("with-nonunique")
                .action(ArgAction::SetTrue)
                .help("Count reads with multiple alignments (NH > 1)"),
        )
        .arg(
            Arg::new("strand")
                .short('S')
                .long("strand")
                .value_parser(value_parser!(StrandSpec))
                .value_name("STRAND")
                .ignore_case(true)
                .default_value("none")
                .help("Library strandedness (none, forward or reverse)"),
        )
        .arg(
            Arg::new("method")
                .short('m')
                .long("method")
                .value_parser(value_parser!(Method))
                .value_name("METHOD")
                .ignore_case(true)
                .default_value("tpm")
                .help("Normalization method (tpm or fpkm)"),
        )
        .arg(
            Arg::new("strict")
                .short('s')
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Stop at the first malformed input line instead of skipping it"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output-file")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output file [default: <stdout>]"),
        )
        .arg(
            Arg::new("counts")
                .short('c')
                .long("counts-file")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Also write raw counts and assignment statistics to file"),
        )
        .arg(
            Arg::new("alignment_file")
                .value_parser(value_parser!(PathBuf))
                .value_name("ALIGNMENT_FILE")
                .required(true)
                .help("Input SAM file with single end alignments"),
        )
        .arg(
            Arg::new("annotation_file")
                .value_parser(value_parser!(PathBuf))
                .value_name("ANNOTATION_FILE")
                .required(true)
                .help("Input GTF/GFF file with gene annotation"),
        )
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m).with_context(|| "Could not initialize logging")?;

    debug!("Processing command line options");

    let nt = m
        .get_one::<NonZeroUsize>("threads")
        .map(|x| usize::from(*x))
        .unwrap_or_else(num_cpus::get);

    let feature_type = m
        .get_one::<String>("feature_type")
        .expect("Missing default feature type");
    let spec = FeatureSpec::new(feature_type, m.get_one::<String>("id").map(|s| s.as_str()))
        .with_context(|| "Could not set up annotation feature selection")?;

    let mut cfg = Config::new(
        m.get_one::<PathBuf>("alignment_file")
            .expect("Missing alignment file"),
        m.get_one::<PathBuf>("annotation_file")
            .expect("Missing annotation file"),
    );

    cfg.set_feature_spec(spec);
    cfg.set_threads(nt);
    cfg.set_filter(ReadFilter::new(
        m.get_one::<u8>("mapq")
            .copied()
            .unwrap_or(DEFAULT_MIN_MAPQ),
        m.get_flag("with_secondary"),
        m.get_flag("with_supplementary"),
        m.get_flag("with_nonunique"),
    ));
    cfg.set_strand(
        *m.get_one::<StrandSpec>("strand")
            .expect("Missing default strand"),
    );
    cfg.set_method(
        *m.get_one::<Method>("method")
            .expect("Missing default method"),
    );
    if m.get_flag("strict") {
        cfg.set_policy(ParsePolicy::FailFast)
    }
    if let Some(p) = m.get_one::<PathBuf>("output") {
        cfg.set_output_file(p)
    }
    if let Some(p) = m.get_one::<PathBuf>("counts") {
        cfg.set_counts_file(p)
    }

    debug!(
        "Threads: {}, method: {}, parse policy: {}, strand: {}, min MAPQ: {}",
        cfg.threads(),
        cfg.method(),
        cfg.policy(),
        cfg.strand(),
        cfg.filter().min_mapq()
    );

    Ok(cfg)
}
