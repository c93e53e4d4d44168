use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use colored::Colorize;
use log::{debug, info};
use serde::Serialize;

use xbr::meta::cst::codepage_find;
use xbr::{ColumnType, DatafileFactory, ReadOptions, Value};

use crate::Commands;

#[derive(Debug)]
pub struct App {
    pub timer: Instant,
    pub input: PathBuf,
}

#[derive(Debug, Serialize)]
struct ColumnInfo {
    name: String,
    r#type: String,
    length: u8,
    decimals: u8,
}

impl App {
    pub fn new(input: PathBuf) -> Self {
        Self {
            timer: Instant::now(),
            input,
        }
    }

    pub fn time_costs(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn run(&mut self, command: Commands) -> Result<()> {
        debug!("{:?}, {:?}", command, self);

        match command {
            Commands::Info => self.do_info()?,
            Commands::Desc => self.do_desc()?,
            Commands::Dump {
                limit,
                deleted,
                verbose,
            } => self.do_dump(limit, deleted, verbose)?,
            Commands::Json { pretty } => self.do_json(pretty)?,
        }

        Ok(())
    }

    fn do_info(&self) -> Result<()> {
        let table = DatafileFactory::open_table(self.input.clone())?;
        let header = table.header();

        println!("Meta Information:");
        println!(
            "{:>12} => {}",
            "file_type".green(),
            header.file_type.to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "modified".green(),
            header
                .modified_date()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "invalid".into())
                .blue()
        );
        println!(
            "{:>12} => {}",
            "row_count".green(),
            header.row_count.to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "row_length".green(),
            header.row_length.to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "columns".green(),
            table.columns_count().to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "file_size".green(),
            header.file_size().to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "memo".green(),
            header.has_memo().to_string().blue()
        );
        let codepage = match codepage_find(header.code_page) {
            Some(cp) => format!("cp{} ({})", cp.code_page, cp.description),
            None => format!("unknown mark 0x{:02x}", header.code_page),
        };
        println!("{:>12} => {}", "code_page".green(), codepage.blue());

        // column type statistics
        let mut stats: BTreeMap<ColumnType, u32> = BTreeMap::new();
        for col in table.columns() {
            *stats.entry(col.col_type).or_insert(0) += 1;
        }
        println!("ColumnTypes Statistics:");
        for entry in &stats {
            println!(
                "{:>12} => {}",
                entry.0.to_string().yellow(),
                entry.1.to_string().blue()
            );
        }
        Ok(())
    }

    fn do_desc(&self) -> Result<()> {
        let table = DatafileFactory::open_table(self.input.clone())?;
        for (pos, col) in table.columns().iter().enumerate() {
            println!(
                "COL{}: name={}, type={}, length={}, decimals={}, displacement={}, nullable={}",
                pos,
                col.name().magenta(),
                col.col_type.to_string().blue(),
                col.length.to_string().cyan(),
                col.decimals.to_string().cyan(),
                col.displacement.to_string().yellow(),
                col.is_nullable().to_string().green(),
            );
            info!("{:?}", col);
        }
        Ok(())
    }

    fn do_dump(&mut self, limit: usize, deleted: bool, verbose: bool) -> Result<()> {
        let mut table = DatafileFactory::open_table(self.input.clone())?;
        let rows = table.rows(ReadOptions {
            skip_invalid: true,
            skip_deleted: !deleted,
        })?;

        for (seq, row) in rows.iter().enumerate() {
            if seq >= limit {
                break;
            }
            println!(
                "****************************** Row {} ******************************",
                row.position
            );
            if row.deleted {
                println!("{:>12} => {}", "status".cyan(), "DELETED".red());
            }
            if verbose {
                println!("{:>12} => {}", "frame".cyan(), hex::encode(row.to_bytes()?));
            }
            for (pos, col) in table.columns().iter().enumerate() {
                let value = &row.field(pos)?.value;
                match value {
                    Value::Character(s) | Value::Memo(s) => {
                        println!("{:>12} => {}", col.name().magenta(), s.yellow());
                    }
                    Value::Integer(i) => {
                        println!("{:>12} => {}", col.name().magenta(), i.to_string().blue());
                    }
                    Value::Float(f) => {
                        println!("{:>12} => {}", col.name().magenta(), f.to_string().blue());
                    }
                    Value::Logical(b) => {
                        println!("{:>12} => {}", col.name().magenta(), b.to_string().green());
                    }
                    Value::Date(d) => {
                        println!("{:>12} => {}", col.name().magenta(), d.to_string().cyan());
                    }
                    Value::DateTime(dt) => {
                        println!("{:>12} => {}", col.name().magenta(), dt.to_string().cyan());
                    }
                    Value::Blob(b) => {
                        println!("{:>12} => {}", col.name().magenta(), hex::encode(b).yellow());
                    }
                    Value::Block(id) => {
                        println!(
                            "{:>12} => {}",
                            col.name().magenta(),
                            format!("block@{}", id).yellow()
                        );
                    }
                    Value::Null => {
                        println!("{:>12} => {}", col.name().magenta(), "NULL".red());
                    }
                }
            }
        }
        Ok(())
    }

    fn do_json(&mut self, pretty: bool) -> Result<()> {
        let mut table = DatafileFactory::open_table(self.input.clone())?;

        let columns: Vec<ColumnInfo> = table
            .columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                r#type: col.col_type.to_string(),
                length: col.length,
                decimals: col.decimals,
            })
            .collect();

        let rows = table.rows(ReadOptions {
            skip_invalid: true,
            skip_deleted: true,
        })?;
        let projected = rows
            .iter()
            .map(|row| table.to_json(row))
            .collect::<Result<Vec<_>, _>>()?;

        let document = serde_json::json!({
            "table": self.input.file_stem().and_then(|s| s.to_str()),
            "columns": columns,
            "rows": projected,
        });

        let json_str = serde_json::to_string(&document)?;
        if pretty {
            println!("{}", jsonxf::pretty_print(&json_str).unwrap_or(json_str));
        } else {
            println!("{}", json_str);
        }
        Ok(())
    }
}

#[cfg(test)]
mod app_tests {
    use super::*;
    use std::env::set_var;
    use std::path::PathBuf;

    use xbr::{util, Column, FileType};

    fn setup() {
        set_var("RUST_LOG", "debug");
        util::init();
    }

    fn fixture(name: &str) -> PathBuf {
        let mut target = std::env::temp_dir();
        target.push(format!("xbr_app_{}_{}.dbf", std::process::id(), name));

        let columns = vec![
            Column::new("NAME", ColumnType::Character, 8, 0).unwrap(),
            Column::new("PRICE", ColumnType::Numeric, 8, 2).unwrap(),
            Column::new("OK", ColumnType::Logical, 1, 0).unwrap(),
        ];
        let mut table =
            DatafileFactory::create_table(target.clone(), FileType::VisualFoxPro, columns).unwrap();
        for (name, price, ok) in [("tea", 2.5f64, true), ("coffee", 3.1, false)] {
            let mut row = table.new_row();
            row.set_value(0, Value::Character(name.into())).unwrap();
            row.set_value(1, Value::Float(price)).unwrap();
            row.set_value(2, Value::Logical(ok)).unwrap();
            table.append_row(&mut row).unwrap();
        }
        target
    }

    #[test]
    fn info_tablefile() {
        setup();
        let target = fixture("info");
        let mut app = App::new(target.clone());
        assert!(app.run(Commands::Info).is_ok());
        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn desc_tablefile() {
        setup();
        let target = fixture("desc");
        let mut app = App::new(target.clone());
        assert!(app.run(Commands::Desc).is_ok());
        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn dump_rows() {
        setup();
        let target = fixture("dump");
        let mut app = App::new(target.clone());
        assert!(app
            .run(Commands::Dump {
                limit: 10,
                deleted: false,
                verbose: true,
            })
            .is_ok());
        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn json_rows() {
        setup();
        let target = fixture("json");
        let mut app = App::new(target.clone());
        assert!(app.run(Commands::Json { pretty: true }).is_ok());
        std::fs::remove_file(&target).ok();
    }
}
