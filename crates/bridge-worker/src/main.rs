//! Worker process binary. `bridge-host::manager::ProcessManager` spawns
//! this directly, passing the socket directory and instance id it already
//! allocated before it knew anything else about the plugin being loaded.

use std::env;
use std::path::PathBuf;
use std::process;

use tracing::{error, info};

fn main() {
    bridge_worker::logging::init();

    let mut args = env::args().skip(1);
    let socket_dir = match args.next() {
        Some(dir) => PathBuf::from(dir),
        None => {
            eprintln!("usage: bridge-worker <socket_dir> <instance_id>");
            process::exit(2);
        }
    };
    let instance: u64 = match args.next().and_then(|s| s.parse().ok()) {
        Some(instance) => instance,
        None => {
            eprintln!("usage: bridge-worker <socket_dir> <instance_id>");
            process::exit(2);
        }
    };

    info!(socket_dir = %socket_dir.display(), instance, "worker starting");

    if let Err(err) = bridge_worker::run(&socket_dir, instance) {
        error!(?err, "worker exited with an error");
        process::exit(1);
    }
}
