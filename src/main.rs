use log::{error, info};
use std::env;
use std::process::ExitCode;
use tab_broker::broker;
use tab_broker::config::BrokerConfig;

fn parse_ports(args: &[String]) -> Option<(u16, u16)> {
    if args.len() != 2 {
        return None;
    }
    let client_port: u16 = args[0].parse().ok()?;
    let upstream_port: u16 = args[1].parse().ok()?;
    if client_port == 0 || upstream_port == 0 || client_port == upstream_port {
        return None;
    }
    Some((client_port, upstream_port))
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((client_port, upstream_port)) = parse_ports(&args) else {
        eprintln!("usage: broker CLIENT-PORT UPSTREAM-PORT");
        return ExitCode::FAILURE;
    };

    let broker = match broker::start(BrokerConfig::for_ports(client_port, upstream_port)).await {
        Ok(broker) => broker,
        Err(err) => {
            error!("failed to start: {}", err);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "listening for clients on {} and the upstream on {}",
        broker.client_addr(),
        broker.upstream_addr()
    );

    if tokio::signal::ctrl_c().await.is_ok() {
        broker.stop().await;
    }
    broker.join().await;

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::parse_ports;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports(&args(&["7000", "7001"])), Some((7000, 7001)));
        assert_eq!(parse_ports(&args(&["7000"])), None);
        assert_eq!(parse_ports(&args(&["7000", "7000"])), None);
        assert_eq!(parse_ports(&args(&["0", "7001"])), None);
        assert_eq!(parse_ports(&args(&["seven", "7001"])), None);
        assert_eq!(parse_ports(&args(&["7000", "7001", "7002"])), None);
    }
}
