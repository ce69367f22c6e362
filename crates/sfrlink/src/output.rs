use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sfrlink_session::{RegisterMap, Symbol, Value};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ValueOutput<'a> {
    name: &'a str,
    kind: &'static str,
    value: Option<i64>,
    hex: Option<String>,
}

impl<'a> ValueOutput<'a> {
    fn new(name: &'a str, value: Value) -> Self {
        let (kind, hex) = match value {
            Value::Register(raw) => ("register", Some(format!("{raw:#04x}"))),
            Value::Constant(_) => ("constant", None),
        };
        Self {
            name,
            kind,
            value: value.as_i64(),
            hex,
        }
    }
}

/// Print symbol values read with `get`.
pub fn print_values(values: &[(String, Value)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for (name, value) in values {
                print_json_line(&ValueOutput::new(name, *value));
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAME", "KIND", "VALUE", "HEX"]);
            for (name, value) in values {
                let out = ValueOutput::new(name, *value);
                table.add_row(vec![
                    name.clone(),
                    out.kind.to_string(),
                    value.to_string(),
                    out.hex.unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (name, value) in values {
                match value {
                    Value::Register(raw) => println!("{name} = {raw:#04x} ({raw})"),
                    Value::Constant(_) => println!("{name} = {value}"),
                }
            }
        }
        OutputFormat::Raw => {
            let mut text = String::new();
            for (_, value) in values {
                text.push_str(&value.to_string());
                text.push('\n');
            }
            print_raw(text.as_bytes());
        }
    }
}

#[derive(Serialize)]
struct InterruptOutput<'a> {
    vector: u8,
    names: &'a [&'a str],
    count: usize,
    timestamp: String,
}

/// Print one interrupt delivered while watching.
pub fn print_interrupt(index: u8, names: &[&str], count: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(&InterruptOutput {
            vector: index,
            names,
            count,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["#", "VECTOR", "NAMES"]);
            table.add_row(vec![count.to_string(), index.to_string(), names.join(", ")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("interrupt {index} ({}) #{count}", names.join(", "));
        }
        OutputFormat::Raw => print_raw(&[index]),
    }
}

/// Print the symbol table, optionally only symbols of one `kind`. Unfiltered
/// JSON output is a map definition that `--map` accepts back.
pub fn print_map(map: &RegisterMap, kind: Option<&str>, format: OutputFormat) {
    let symbols: Vec<(&str, &Symbol)> = map
        .iter()
        .filter(|(_, symbol)| kind.is_none_or(|kind| symbol.kind() == kind))
        .collect();

    match format {
        OutputFormat::Json => {
            let mut definition = map.to_definition();
            if let Some(kind) = kind {
                if kind != "register" {
                    definition.registers.clear();
                }
                if kind != "alias" {
                    definition.aliases.clear();
                }
                if kind != "constant" {
                    definition.constants.clear();
                }
                if kind != "vector" {
                    definition.vectors.clear();
                }
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&definition).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["NAME", "KIND", "ADDRESS", "WIDTH", "SPACE", "DETAIL"]);
            for (name, symbol) in symbols {
                table.add_row(symbol_row(name, symbol));
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (name, symbol) in symbols {
                let row = symbol_row(name, symbol);
                let detail: Vec<&str> = row[2..]
                    .iter()
                    .map(String::as_str)
                    .filter(|s| !s.is_empty())
                    .collect();
                println!("{:<24} {:<9} {}", row[0], row[1], detail.join(" "));
            }
        }
        OutputFormat::Raw => {
            let mut text = String::new();
            for (name, _) in symbols {
                text.push_str(name);
                text.push('\n');
            }
            print_raw(text.as_bytes());
        }
    }
}

fn symbol_row(name: &str, symbol: &Symbol) -> Vec<String> {
    let mut row = vec![name.to_string(), symbol.kind().to_string()];
    match symbol {
        Symbol::Register(register) | Symbol::Alias { register, .. } => {
            row.push(format!("{:#04x}", register.address));
            row.push(register.width.bits().to_string());
            row.push(register.space.to_string());
        }
        Symbol::Constant(_) | Symbol::Vector(_) => {
            row.extend([String::new(), String::new(), String::new()]);
        }
    }
    row.push(match symbol {
        Symbol::Register(_) => String::new(),
        Symbol::Alias { target, .. } => format!("-> {target}"),
        Symbol::Constant(Some(value)) => value.to_string(),
        Symbol::Constant(None) => "(defined)".to_string(),
        Symbol::Vector(index) => format!("vector {index}"),
    });
    row
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json_line<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
