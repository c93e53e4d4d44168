use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use xbr::util;

mod app;

#[derive(Debug, Parser)]
#[command(author, version, about = "The xbase tablefile (*.dbf) reader", long_about = None)]
pub struct Args {
    /// Input xbase tablefile. for example customers.dbf
    input: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print basic information.
    Info,

    /// Describe the table schema.
    Desc,

    /// Dump table rows.
    Dump {
        /// Limit the total rows in the dump
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Include rows flagged as deleted
        #[arg(short, long, default_value_t = false)]
        deleted: bool,

        /// Print more information
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },

    /// Print rows as a JSON document
    Json {
        /// Pretty print the JSON output
        #[arg(short, long, default_value_t = false)]
        pretty: bool,
    },
}

fn main() -> Result<()> {
    util::init();

    let args = Args::parse();
    let mut app = app::App::new(args.input);

    app.run(args.command)?;

    info!("time costs {:?}", app.time_costs());
    Ok(())
}
