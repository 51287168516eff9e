use mxlink_frame::{LinkConfig, DEFAULT_MAX_PAYLOAD};
use mxlink_ipc::sim::SIM_FIRMWARE_VERSION;
use mxlink_ipc::MAX_IPC_PARAMS;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("mxlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let link = LinkConfig::default();
    println!("name: mxlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "build_target: {}",
        option_env!("MXLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: async={}, cli=true", cfg!(feature = "async"));
    println!("max_payload: {DEFAULT_MAX_PAYLOAD}");
    println!("max_ipc_params: {MAX_IPC_PARAMS}");
    println!("flow_timeout_ms: {}", link.flow_timeout.as_millis());
    println!("sim_firmware: {SIM_FIRMWARE_VERSION}");

    Ok(SUCCESS)
}
