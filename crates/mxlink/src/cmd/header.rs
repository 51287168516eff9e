use mxlink_frame::{decode_slave_header, SpiHeader, HEADER_SIZE, SPI_READ, SPI_WRITE};
use serde::Serialize;

use crate::cmd::{parse_hex, HeaderArgs};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct HeaderOutput {
    kind: u8,
    kind_name: &'static str,
    len: u16,
    len_complement: u16,
    length_consistent: bool,
    valid: bool,
    error: Option<String>,
}

pub fn run(args: HeaderArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = parse_hex(&args.bytes)?;
    let bytes: [u8; HEADER_SIZE] = raw.as_slice().try_into().map_err(|_| {
        CliError::new(
            USAGE,
            format!("header must be {HEADER_SIZE} bytes, got {}", raw.len()),
        )
    })?;

    let out = inspect(&bytes, args.master);
    let code = if out.valid { SUCCESS } else { DATA_INVALID };
    print_header(&out, format);
    Ok(code)
}

fn inspect(bytes: &[u8; HEADER_SIZE], master: bool) -> HeaderOutput {
    let header = SpiHeader::parse(bytes);
    let error = if master {
        validate_master(&header)
    } else {
        decode_slave_header(bytes).err().map(|err| err.to_string())
    };
    HeaderOutput {
        kind: header.kind,
        kind_name: kind_name(header.kind),
        len: header.len,
        len_complement: header.len_complement,
        length_consistent: header.is_length_consistent(),
        valid: error.is_none(),
        error,
    }
}

fn validate_master(header: &SpiHeader) -> Option<String> {
    if header.kind != SPI_WRITE {
        return Some(format!(
            "invalid header type 0x{:02x} (expected WRITE 0x0a)",
            header.kind
        ));
    }
    if !header.is_length_consistent() {
        return Some(format!(
            "header length check failed (len 0x{:04x}, complement 0x{:04x})",
            header.len, header.len_complement
        ));
    }
    None
}

fn kind_name(kind: u8) -> &'static str {
    match kind {
        SPI_WRITE => "WRITE",
        SPI_READ => "READ",
        _ => "UNKNOWN",
    }
}

fn print_header(out: &HeaderOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            vec!["TYPE", "LEN", "~LEN", "VALID", "ERROR"],
            vec![vec![
                format!("0x{:02x} ({})", out.kind, out.kind_name),
                out.len.to_string(),
                format!("0x{:04x}", out.len_complement),
                out.valid.to_string(),
                out.error.clone().unwrap_or_default(),
            ]],
        ),
        OutputFormat::Pretty => {
            println!(
                "type=0x{:02x} ({}) len={} complement=0x{:04x} valid={}",
                out.kind, out.kind_name, out.len, out.len_complement, out.valid
            );
            if let Some(err) = &out.error {
                println!("error: {err}");
            }
        }
        OutputFormat::Raw => println!("{}", if out.valid { "valid" } else { "invalid" }),
    }
}
