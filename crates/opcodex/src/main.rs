//! opcodex - inspect x86 opcode encodings
//!
//! Usage:
//!   opcodex encoding "<nasm encoding>"           Compile a NASM encoding string
//!   opcodex vex "<vex descriptor>"               Parse a VEX/XOP/EVEX descriptor
//!   opcodex bits "<pattern>" --bind a=0b101      Evaluate a bit pattern
//!   opcodex decode "<hex>" --table insns.dat     Decode bytes against a table
//!   opcodex check insns.dat                      Parse every row of a table

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use opcodex_encoding::bits::{self, BitsValue};
use opcodex_encoding::nasm::{parse_encoding, read_entries, CompileContext, OperandKind};
use opcodex_encoding::{CodeSegmentType, OpcodeTable, VexEncoding};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "opcodex")]
#[command(about = "Inspect and match x86 opcode encodings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a NASM encoding string such as "66 0f 3a cc /r ib"
    Encoding {
        text: String,
        /// Restrict the encoding to a processor mode
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,
        /// Kind of the ModRM.rm operand, for /n forms
        #[arg(long, value_enum)]
        rm: Option<RmKind>,
    },
    /// Parse a VEX/XOP/EVEX descriptor such as "vex.nds.256.66.0f38.w1"
    Vex { text: String },
    /// Normalize and evaluate a bit pattern
    Bits {
        pattern: String,
        /// Bind a variable to a binary value, e.g. a=0b101
        #[arg(short, long = "bind", value_parser = parse_binding)]
        bindings: Vec<(char, BitsValue)>,
    },
    /// Decode hex bytes against an insns.dat table
    Decode {
        /// Instruction bytes, e.g. "c5 f8 10 c1"
        bytes: String,
        /// Path to an insns.dat file
        #[arg(short, long)]
        table: PathBuf,
        #[arg(short, long, value_enum, default_value = "x64")]
        mode: Mode,
        /// Decode every instruction in the byte string
        #[arg(short, long)]
        all: bool,
    },
    /// Parse and compile every row of an insns.dat file
    Check { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    X64,
    Ia32,
    Ia16,
}

impl From<Mode> for CodeSegmentType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::X64 => CodeSegmentType::X64,
            Mode::Ia32 => CodeSegmentType::Ia32,
            Mode::Ia16 => CodeSegmentType::Ia16,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RmKind {
    Mem,
    Reg,
    Rm,
}

impl From<RmKind> for OperandKind {
    fn from(kind: RmKind) -> Self {
        match kind {
            RmKind::Mem => OperandKind::Memory,
            RmKind::Reg => OperandKind::Register,
            RmKind::Rm => OperandKind::RegisterOrMemory,
        }
    }
}

fn parse_binding(s: &str) -> Result<(char, BitsValue), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <letter>=0b<bits>, got '{}'", s))?;
    let mut chars = name.chars();
    let (Some(letter), None) = (chars.next(), chars.next()) else {
        return Err(format!("variable must be a single letter: '{}'", name));
    };
    if !letter.is_ascii_lowercase() {
        return Err(format!("variable must be a lowercase letter: '{}'", name));
    }

    let digits = value.strip_prefix("0b").unwrap_or(value).replace('_', "");
    let bits = u64::from_str_radix(&digits, 2).map_err(|e| e.to_string())?;
    let length = u8::try_from(digits.len()).map_err(|e| e.to_string())?;
    let value = BitsValue::new(bits, length).map_err(|e| e.to_string())?;
    Ok((letter, value))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .split_whitespace()
        .map(|part| part.strip_prefix("0x").unwrap_or(part))
        .collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        bail!("Expected an even number of hex digits in '{}'", s);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn load_table(path: &Path, verbose: bool) -> Result<OpcodeTable> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read table: {}", path.display()))?;
    let (table, errors) = OpcodeTable::from_insns(&text);
    if verbose {
        for error in &errors {
            eprintln!("warning: {}: {}", path.display(), error);
        }
        eprintln!("loaded {} encodings from {}", table.len(), path.display());
    }
    if table.is_empty() {
        bail!("No encodings in {}", path.display());
    }
    Ok(table)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Encoding { text, mode, rm } => {
            let parsed = parse_encoding(&text).context("Failed to parse encoding")?;
            let mut ctx = CompileContext::default()
                .with_long_mode(mode.map(|m| CodeSegmentType::from(m).is_long_mode()));
            if let Some(rm) = rm {
                ctx = ctx.with_rm_hint(rm.into());
            }
            if cli.verbose {
                let tokens: Vec<String> =
                    parsed.tokens.iter().map(|t| format!("{:?}", t)).collect();
                eprintln!("tokens: {}", tokens.join(", "));
            }
            let encoding = parsed
                .to_opcode_encoding(&ctx)
                .context("Failed to compile encoding")?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&encoding)?);
            } else {
                println!("{}", encoding);
                println!("  map:        {:?}", encoding.map());
                println!(
                    "  main byte:  {:02x} (mask {:02x})",
                    encoding.main_byte(),
                    encoding.main_byte_mask()
                );
                println!("  modrm:      {:?}", encoding.addressing_form());
                println!("  immediate:  {:?}", encoding.immediate_size());
                if let Ok(vex) = encoding.to_vex_encoding() {
                    println!("  vex:        {}", vex);
                }
            }
        }
        Commands::Vex { text } => {
            let vex = VexEncoding::parse(&text).context("Failed to parse VEX descriptor")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&vex.fields())?);
            } else {
                println!("{}", vex.to_intel_style_string());
                println!("  bits: {:#06x}", vex.to_bits());
            }
        }
        Commands::Bits { pattern, bindings } => {
            let normalized = bits::normalize(&pattern).context("Invalid bit pattern")?;
            let pretty = bits::prettify(&normalized);
            let bindings: HashMap<char, BitsValue> = bindings.into_iter().collect();
            let value = if bits::is_constant(&normalized) || !bindings.is_empty() {
                Some(
                    bits::evaluate(&normalized, |c| bindings.get(&c).copied())
                        .context("Failed to evaluate bit pattern")?,
                )
            } else {
                None
            };

            if cli.json {
                let output = json!({
                    "normalized": normalized,
                    "pretty": pretty,
                    "value": value,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", pretty);
                if let Some(value) = value {
                    println!("  value: {} ({} bits)", value, value.len());
                }
            }
        }
        Commands::Decode {
            bytes,
            table,
            mode,
            all,
        } => {
            let bytes = parse_hex_bytes(&bytes)?;
            let table = load_table(&table, cli.verbose)?;
            let mode = CodeSegmentType::from(mode);

            if !all {
                let decoded = table
                    .decode(&bytes, mode)
                    .with_context(|| format!("Failed to decode {}", format_bytes(&bytes)))?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&decoded)?);
                } else {
                    println!(
                        "{:<24} {:<10} {}",
                        format_bytes(&bytes[..decoded.length]),
                        decoded.mnemonic,
                        decoded.encoding
                    );
                }
                return Ok(());
            }

            let results = table.decode_all(&bytes, mode);
            if cli.json {
                let output: Vec<_> = results
                    .iter()
                    .map(|(offset, result)| match result {
                        Ok(decoded) => json!({ "offset": offset, "instruction": decoded }),
                        Err(e) => json!({ "offset": offset, "error": e.to_string() }),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for (offset, result) in &results {
                    match result {
                        Ok(decoded) => println!(
                            "{:4x}: {:<24} {:<10} {}",
                            offset,
                            format_bytes(&bytes[*offset..*offset + decoded.length]),
                            decoded.mnemonic,
                            decoded.encoding
                        ),
                        Err(e) => println!(
                            "{:4x}: {:<24} <{}>",
                            offset,
                            format_bytes(&bytes[*offset..*offset + 1]),
                            e
                        ),
                    }
                }
            }
        }
        Commands::Check { path } => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read table: {}", path.display()))?;

            let mut table = OpcodeTable::new();
            let mut rows = 0;
            let mut failures = 0;
            for (line, result) in read_entries(&text) {
                rows += 1;
                match result.and_then(|entry| table.push_entry(&entry).map(|n| (entry, n))) {
                    Ok((entry, count)) => {
                        if cli.verbose {
                            eprintln!("line {}: {} -> {} encodings", line, entry.mnemonic, count);
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        println!("{}:{}: {}", path.display(), line, e);
                    }
                }
            }

            if cli.json {
                let output = json!({
                    "rows": rows,
                    "encodings": table.len(),
                    "failures": failures,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{} rows, {} encodings, {} failures", rows, table.len(), failures);
            }
            if failures > 0 {
                bail!("{} of {} rows failed", failures, rows);
            }
        }
    }

    Ok(())
}
