//! Process entry point: admin API server, background scheduler, and
//! one-shot maintenance commands.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use farm_api::notifications::LogChannel;
use farm_api::{serve, GameService, ServiceConfig};
use tokio::sync::Mutex;

fn print_usage() {
    println!("farm-cli <command>");
    println!("commands:");
    println!("  serve [addr]");
    println!("    admin api + scheduler + notification drain");
    println!("    default addr: 127.0.0.1:3001 (or FARM_ADMIN_ADDR)");
    println!("  scheduler");
    println!("    run only the timer jobs and the notification drain");
    println!("  crop-check");
    println!("    run the crop readiness sweep once and exit");
    println!("  vip-rewards");
    println!("    run the vip daily reward sweep once and exit");
    println!("  backup");
    println!("    copy the database into the backup directory once");
    println!("  init");
    println!("    create the database schema and exit");
}

fn parse_socket_addr(value: Option<&String>, fallback: SocketAddr) -> Result<SocketAddr, String> {
    match value {
        Some(raw) => raw
            .parse::<SocketAddr>()
            .map_err(|_| format!("invalid addr: {raw}")),
        None => Ok(fallback),
    }
}

fn open_service(config: ServiceConfig) -> GameService {
    match GameService::open(config, Utc::now()) {
        Ok(service) => service,
        Err(err) => {
            eprintln!("failed to open database: {err}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);
    let config = ServiceConfig::from_env();

    match command {
        Some("serve") => {
            let addr = match parse_socket_addr(args.get(2), config.admin_addr) {
                Ok(addr) => addr,
                Err(err) => {
                    eprintln!("error: {err}");
                    print_usage();
                    std::process::exit(2);
                }
            };
            let service = Arc::new(Mutex::new(open_service(config)));

            tokio::spawn(farm_api::jobs::run_scheduler(service.clone()));
            tokio::spawn(farm_api::notifications::run_drain(
                service.clone(),
                LogChannel,
            ));

            println!("serving admin api on http://{addr}");
            if let Err(err) = serve(addr, service).await {
                eprintln!("server error: {err}");
                std::process::exit(1);
            }
        }
        Some("scheduler") => {
            let service = Arc::new(Mutex::new(open_service(config)));
            tokio::spawn(farm_api::notifications::run_drain(
                service.clone(),
                LogChannel,
            ));
            println!("scheduler running; press Ctrl+C to stop");
            farm_api::jobs::run_scheduler(service).await;
        }
        Some("crop-check") => {
            let mut service = open_service(config);
            match service.sweep_crops(Utc::now()) {
                Ok(marked) => println!("crop check completed: {marked} patches marked ready"),
                Err(err) => {
                    eprintln!("crop check failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("vip-rewards") => {
            let mut service = open_service(config);
            match service.vip_reward_sweep(Utc::now()) {
                Ok(processed) => println!("vip rewards processed for {processed} users"),
                Err(err) => {
                    eprintln!("vip rewards failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("backup") => {
            let mut service = open_service(config);
            match service.backup(Utc::now()) {
                Ok(path) => println!("backup completed: {}", path.display()),
                Err(err) => {
                    eprintln!("backup failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("init") => {
            // Opening the store runs the migrations.
            let _ = open_service(config);
            println!("database initialized");
        }
        _ => {
            print_usage();
        }
    }
}
