use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use mxlink_ipc::sim::event_packet;
use mxlink_ipc::{api, Event, EventSummary, WifiStatus};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cmd::{parse_duration, MonitorArgs, SimLink};
use crate::exit::{ipc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{now_unix_seconds, print_json, print_table, OutputFormat};

/// Events the simulated co-processor can be told to emit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Injection {
    Reboot,
    StaDown,
    StaUp,
    StaGotIp,
    ApDown,
    ApUp,
    Bypass,
}

const DEFAULT_SCRIPT: [Injection; 4] = [
    Injection::StaUp,
    Injection::StaGotIp,
    Injection::Bypass,
    Injection::Reboot,
];

/// Broadcast Ethernet header followed by a short body.
const BYPASS_FRAME: [u8; 18] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x01,
    0x08, 0x00,
];

impl Injection {
    pub fn packet(self) -> Vec<u8> {
        match self {
            Self::Reboot => event_packet(api::SYS_REBOOT_EVENT, &[]),
            Self::StaDown => status_packet(WifiStatus::StaDown),
            Self::StaUp => status_packet(WifiStatus::StaUp),
            Self::StaGotIp => status_packet(WifiStatus::StaGotIp),
            Self::ApDown => status_packet(WifiStatus::ApDown),
            Self::ApUp => status_packet(WifiStatus::ApUp),
            Self::Bypass => {
                let mut params = Vec::with_capacity(8 + BYPASS_FRAME.len());
                params.extend_from_slice(&0i32.to_le_bytes());
                params.extend_from_slice(&[0, 0]);
                params.extend_from_slice(&(BYPASS_FRAME.len() as u16).to_le_bytes());
                params.extend_from_slice(&BYPASS_FRAME);
                event_packet(api::WIFI_BYPASS_INPUT_EVENT, &params)
            }
        }
    }
}

fn status_packet(status: WifiStatus) -> Vec<u8> {
    event_packet(api::WIFI_STATUS_EVENT, &[status as u8])
}

#[derive(Serialize)]
struct EventOutput {
    seq: usize,
    #[serde(flatten)]
    event: EventSummary,
    timestamp: String,
}

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let script = args.inject.clone().unwrap_or_else(|| DEFAULT_SCRIPT.to_vec());

    let link = SimLink::open(&args.link)?;
    let (tx, rx) = mpsc::channel();
    for api_id in [
        api::SYS_REBOOT_EVENT,
        api::WIFI_STATUS_EVENT,
        api::WIFI_BYPASS_INPUT_EVENT,
    ] {
        let tx = tx.clone();
        link.session.events().register(api_id, move |event: Event| {
            match EventSummary::from_event(event) {
                Ok(summary) => {
                    let _ = tx.send(summary);
                }
                Err(err) => warn!(error = %err, "undecodable event"),
            }
        });
    }
    drop(tx);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let slice = Duration::from_millis(10).min(interval);
    let mut pending = script.into_iter();
    let mut next_inject = Instant::now();
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if Instant::now() >= next_inject {
            if let Some(injection) = pending.next() {
                debug!(?injection, "injecting event");
                link.sim.push_outbound(injection.packet());
                next_inject += interval;
            }
        }

        if link.session.is_polled() {
            link.session
                .poll(slice)
                .map_err(|err| ipc_error("poll failed", err))?;
        }

        match rx.recv_timeout(slice) {
            Ok(event) => {
                printed = printed.saturating_add(1);
                print_event(
                    &EventOutput {
                        seq: printed,
                        event,
                        timestamp: now_unix_seconds(),
                    },
                    format,
                );
                if args.count.is_some_and(|count| printed >= count) {
                    return Ok(SUCCESS);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(SUCCESS)
}

fn print_event(out: &EventOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let (kind, detail) = describe(&out.event);
            print_table(
                vec!["SEQ", "EVENT", "DETAIL"],
                vec![vec![out.seq.to_string(), kind.to_string(), detail]],
            );
        }
        OutputFormat::Pretty => {
            let (kind, detail) = describe(&out.event);
            println!("#{} {kind} {detail}", out.seq);
        }
        OutputFormat::Raw => println!("{}", describe(&out.event).0),
    }
}

fn describe(event: &EventSummary) -> (&'static str, String) {
    match event {
        EventSummary::Reboot => ("reboot", String::new()),
        EventSummary::WifiStatus { status, interface } => {
            ("wifi_status", format!("{status} ({interface:?})"))
        }
        EventSummary::BypassInput { idx, len } => ("bypass_input", format!("idx={idx} len={len}")),
        EventSummary::Other { api_id, len } => ("other", format!("api=0x{api_id:04x} len={len}")),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
