//! Run a Mininet topology on a remote VM and fetch its results.
//!
//! Uploads the simulation script and topology document, runs the script
//! under `sudo` (answering the password prompt), then copies the newest
//! result directory back to `./mn_result_raw/<timestamp>/`.
//!
//! Connection details not given on the command line are read from the
//! topology document's `username`, `password` and `address` fields.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example run_topology -- --topo input-topo.json --script mininet-script.py
//! ```
//!
//! Hand the Mininet CLI to the terminal instead of leaving it right away:
//! ```bash
//! cargo run --example run_topology -- --topo input-topo.json --script mininet-script.py --cli
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use mnpilot::transfer::{DEFAULT_LOCAL_RESULTS, DEFAULT_REMOTE_RESULTS, retrieve_results};
use mnpilot::{Mode, Session, SessionBuilder, SimulationPlan, SshTransport, StdoutConsole};

/// Connection fields carried by the topology document.
#[derive(Debug, Default, Deserialize)]
struct TopologyLogin {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    address: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let login = read_login(&args.topo)?;

    let (host, port) = match args.host.clone().or_else(|| non_empty(&login.address)) {
        Some(address) => split_address(&address),
        None => {
            eprintln!("Error: no host given and the topology has no 'address'");
            std::process::exit(2);
        }
    };
    let Some(user) = args.user.clone().or_else(|| non_empty(&login.username)) else {
        eprintln!("Error: no user given and the topology has no 'username'");
        std::process::exit(2);
    };
    let Some(password) = args.password.clone().or_else(|| non_empty(&login.password)) else {
        eprintln!("Error: no password given and the topology has no 'password'");
        std::process::exit(2);
    };

    let plan = SimulationPlan::new(&args.script, &args.topo);
    let mode = if args.cli { Mode::Interactive } else { Mode::Automated };

    let mut builder = SessionBuilder::new(host)
        .port(port)
        .username(user)
        .password(password)
        .command(plan.command())
        .mode(mode)
        .deadline(Duration::from_secs(args.deadline));
    if args.insecure {
        builder = builder.danger_disable_host_key_verification();
    }
    let config = builder.build()?;
    let ssh = config.ssh.clone();

    println!("Connecting to {}...", ssh.socket_addr());
    let mut session = Session::open(config).await?;

    println!("Uploading {} and {}...", args.script.display(), args.topo.display());
    session.upload(&plan).await?;

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let code = match session.run(Arc::new(StdoutConsole), None).await {
        Ok(report) => {
            println!(
                "\nSession {} finished ({}) in {:.1?}",
                report.id, report.reason, report.elapsed
            );
            0
        }
        Err(err) => {
            eprintln!("\nSession failed: {}", err);
            1
        }
    };

    println!("Fetching results...");
    let mut transport = SshTransport::connect(ssh).await?;
    let local_base = Path::new(DEFAULT_LOCAL_RESULTS);
    match retrieve_results(&mut transport, DEFAULT_REMOTE_RESULTS, local_base).await {
        Ok(Some(dir)) => println!("Results copied to {}", dir.display()),
        Ok(None) => println!("No test results found to copy"),
        Err(e) => eprintln!("Result retrieval failed: {}", e),
    }
    if let Err(e) = mnpilot::Transport::close(&mut transport).await {
        eprintln!("close: {}", e);
    }

    std::process::exit(code);
}

fn read_login(path: &Path) -> Result<TopologyLogin, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Split `host[:port]`, defaulting the port to 22.
fn split_address(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), 22),
        },
        None => (address.to_string(), 22),
    }
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    topo: PathBuf,
    script: PathBuf,
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    cli: bool,
    insecure: bool,
    deadline: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut topo = PathBuf::from("input-topo.json");
        let mut script = PathBuf::from("mininet-script.py");
        let mut host = None;
        let mut user = None;
        let mut password = env::var("MNPILOT_PASSWORD").ok();
        let mut cli = false;
        let mut insecure = false;
        let mut deadline = 120u64;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--topo" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        topo = PathBuf::from(&args[i]);
                    }
                }
                "--script" | "-s" => {
                    i += 1;
                    if i < args.len() {
                        script = PathBuf::from(&args[i]);
                    }
                }
                "--remote" | "-r" => {
                    i += 1;
                    if i < args.len() {
                        match args[i].split_once('@') {
                            Some((u, h)) => {
                                user = Some(u.to_string());
                                host = Some(h.to_string());
                            }
                            None => host = Some(args[i].clone()),
                        }
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = Some(args[i].clone());
                    }
                }
                "--deadline" | "-d" => {
                    i += 1;
                    if i < args.len() {
                        deadline = args[i].parse().unwrap_or(120);
                    }
                }
                "--cli" => cli = true,
                "--insecure" => insecure = true,
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            topo,
            script,
            host,
            user,
            password,
            cli,
            insecure,
            deadline,
        }
    }

    fn print_help() {
        println!(
            r#"mnpilot run_topology example

USAGE:
    cargo run --example run_topology -- [OPTIONS]

OPTIONS:
    -t, --topo <PATH>          Topology document [default: input-topo.json]
    -s, --script <PATH>        Simulation script [default: mininet-script.py]
    -r, --remote <USER@HOST>   Target, e.g. alice@192.168.64.5:22 [default: from topology]
    -P, --password <PASS>      SSH and sudo password [default: $MNPILOT_PASSWORD or topology]
    -d, --deadline <SECS>      Overall session deadline [default: 120]
    --cli                      Hand the Mininet CLI to this terminal
    --insecure                 Skip host key verification
    --help                     Print this help message
"#
        );
    }
}
