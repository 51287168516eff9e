use std::time::Instant;

use mxlink_ipc::api;
use serde::Serialize;
use tracing::info;

use crate::cmd::{parse_hex, EchoArgs, SimLink};
use crate::exit::{ipc_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{payload_preview, print_json, print_raw, print_table, OutputFormat};

#[derive(Serialize)]
struct EchoOutput {
    api_id: u16,
    round: usize,
    size: usize,
    matched: bool,
    round_trip_us: u128,
    payload: String,
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let input = resolve_payload(&args)?;
    if args.repeat == 0 {
        return Err(CliError::new(USAGE, "--repeat must be at least 1"));
    }

    let link = SimLink::open(&args.link)?;
    let mut out = vec![0u8; input.len().max(1)];
    let mut results = Vec::with_capacity(args.repeat);
    for round in 1..=args.repeat {
        let started = Instant::now();
        let copied = link
            .session
            .echo(&input, &mut out, link.timeout)
            .map_err(|err| ipc_error("echo failed", err))?;
        let elapsed = started.elapsed();
        let echoed = &out[..copied];
        if echoed != input.as_slice() {
            return Err(CliError::new(
                DATA_INVALID,
                format!("echo mismatch in round {round}: sent {} bytes, got {copied}", input.len()),
            ));
        }
        info!(round, size = copied, ?elapsed, "echo ok");
        results.push(EchoOutput {
            api_id: api::SYS_ECHO_CMD,
            round,
            size: copied,
            matched: true,
            round_trip_us: elapsed.as_micros(),
            payload: payload_preview(echoed),
        });
    }

    print_results(&results, &input, format);
    Ok(SUCCESS)
}

fn resolve_payload(args: &EchoArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return parse_hex(hex);
    }
    if let Some(size) = args.size {
        return Ok((0..size).map(|i| (i % 251) as u8).collect());
    }
    Ok(vec![1, 2, 3])
}

fn print_results(results: &[EchoOutput], input: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => results.iter().for_each(print_json),
        OutputFormat::Table => print_table(
            vec!["ROUND", "SIZE", "RTT (us)", "PAYLOAD"],
            results
                .iter()
                .map(|r| {
                    vec![
                        r.round.to_string(),
                        r.size.to_string(),
                        r.round_trip_us.to_string(),
                        r.payload.clone(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for r in results {
                println!(
                    "round={} size={} rtt={}us payload={}",
                    r.round,
                    r.size,
                    r.round_trip_us,
                    hex::encode(input)
                );
            }
        }
        OutputFormat::Raw => print_raw(input),
    }
}

#[cfg(test)]
mod tests {
    use mxlink_ipc::MAX_IPC_PARAMS;

    use super::*;
    use crate::cmd::LinkArgs;

    fn args() -> EchoArgs {
        EchoArgs {
            data: None,
            hex: None,
            size: None,
            repeat: 1,
            link: LinkArgs {
                timeout: "200ms".to_string(),
                mode: Default::default(),
                mismatch_policy: Default::default(),
            },
        }
    }

    #[test]
    fn default_payload_is_one_two_three() {
        assert_eq!(resolve_payload(&args()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn generated_payload_has_requested_size() {
        let mut a = args();
        a.size = Some(MAX_IPC_PARAMS);
        let payload = resolve_payload(&a).unwrap();
        assert_eq!(payload.len(), MAX_IPC_PARAMS);
        assert_eq!(payload[251], 0);
    }

    #[test]
    fn oversize_payload_is_data_invalid() {
        let mut a = args();
        a.size = Some(MAX_IPC_PARAMS + 1);
        assert_eq!(run(a, OutputFormat::Json).unwrap_err().code, DATA_INVALID);
    }

    #[test]
    fn hex_payload() {
        let mut a = args();
        a.hex = Some("deadbeef".to_string());
        assert_eq!(resolve_payload(&a).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
