//! Gene level expression estimates from single end alignments.
//!
//! Reads from a SAM style alignment file are assigned to the gene interval (from a GTF/GFF
//! style annotation) that contains their position, counted, and the counts normalized for
//! gene length and library size.

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod alignment;
pub mod annotation;
pub mod assign;
pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod normalize;
pub mod output;
pub mod process;
