use mxlink_ipc::{api, MAX_IPC_PARAMS};
use serde::Serialize;

use crate::cmd::{parse_api_id, parse_hex, RequestArgs, SimLink};
use crate::exit::{ipc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{payload_preview, print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct ResponseOutput<'a> {
    api_id: u16,
    api_name: &'a str,
    params_size: usize,
    response_size: usize,
    response_hex: String,
    response: String,
}

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let api_id = parse_api_id(&args.api_id)?;
    if api::is_event(api_id) {
        return Err(CliError::new(
            USAGE,
            format!("api id 0x{api_id:04x} is an event id, not a command"),
        ));
    }
    let params = parse_hex(&args.params)?;
    let capacity = args.capacity.unwrap_or(MAX_IPC_PARAMS);

    let link = SimLink::open(&args.link)?;
    if args.silent {
        link.firmware.set_silent(api_id, true);
    }

    let mut out = vec![0u8; capacity];
    let copied = link
        .session
        .request(api_id, &params, &mut out, link.timeout)
        .map_err(|err| ipc_error("request failed", err))?;
    let response = &out[..copied];

    let output = ResponseOutput {
        api_id,
        api_name: api::api_name(api_id).unwrap_or("unknown"),
        params_size: params.len(),
        response_size: copied,
        response_hex: hex::encode(response),
        response: payload_preview(response),
    };
    print_response(&output, response, format);
    Ok(SUCCESS)
}

fn print_response(out: &ResponseOutput<'_>, response: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Response:");
            println!("  Api:      0x{:04x} ({})", out.api_id, out.api_name);
            println!("  Params:   {} bytes", out.params_size);
            println!("  Size:     {} bytes", out.response_size);
            println!("  Hex:      {}", out.response_hex);
            println!("  Payload:  {}", out.response);
        }
        OutputFormat::Raw => print_raw(response),
    }
}
