// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS TCPROS CLI
//!
//! # Usage
//!
//! ```bash
//! # Publish /chatter every 500 ms and serve /add_two_ints on port 11511
//! hdds-tcpros serve --port 11511 --latch
//!
//! # Print messages from a publisher
//! hdds-tcpros echo --host 127.0.0.1 --port 11511 --topic /chatter -n 5
//!
//! # Call the service
//! hdds-tcpros call --host 127.0.0.1 --port 11511 3 4
//!
//! # Check that a server answers
//! hdds-tcpros probe --host 127.0.0.1 --port 11511
//! ```

use clap::{Parser, Subcommand};
use hdds_tcpros::header::fields;
use hdds_tcpros::msgs::{AddTwoInts, AddTwoIntsRequest, AddTwoIntsResponse, StringMsg};
use hdds_tcpros::{Node, NodeConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// HDDS TCPROS transport tool
#[derive(Parser, Debug)]
#[command(name = "hdds-tcpros")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Node name used as callerid
    #[arg(long, global = true)]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish a std_msgs/String topic and serve AddTwoInts
    Serve {
        /// TCP port to listen on (0 = ephemeral)
        #[arg(short, long)]
        port: Option<u16>,

        /// Topic to publish
        #[arg(short, long, default_value = "/chatter")]
        topic: String,

        /// Service to advertise
        #[arg(short, long, default_value = "/add_two_ints")]
        service: String,

        /// Publish period in milliseconds
        #[arg(long, default_value = "500")]
        period_ms: u64,

        /// Latch the last message for late subscribers
        #[arg(long)]
        latch: bool,
    },

    /// Subscribe to a publisher and print its messages
    Echo {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long)]
        port: u16,

        #[arg(short, long, default_value = "/chatter")]
        topic: String,

        /// Stop after this many messages (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },

    /// Call an AddTwoInts service
    Call {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long)]
        port: u16,

        #[arg(short, long, default_value = "/add_two_ints")]
        service: String,

        a: i64,
        b: i64,
    },

    /// Probe a TCPROS server
    Probe {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long)]
        port: u16,

        #[arg(short, long, default_value = "/add_two_ints")]
        service: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            NodeConfig::from_file(path)?
        }
        None => NodeConfig::default(),
    };
    if let Some(name) = args.name {
        config.name = name;
    }

    match args.command {
        Commands::Serve {
            port,
            topic,
            service,
            period_ms,
            latch,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            cmd_serve(config, &topic, &service, period_ms, latch).await
        }
        Commands::Echo {
            host,
            port,
            topic,
            count,
        } => cmd_echo(config, &host, port, &topic, count).await,
        Commands::Call {
            host,
            port,
            service,
            a,
            b,
        } => {
            let node = Node::new(config)?;
            let response = node
                .call_service::<AddTwoInts>(&host, port, &service, &AddTwoIntsRequest { a, b })
                .await?;
            println!("{} + {} = {}", a, b, response.sum);
            Ok(())
        }
        Commands::Probe {
            host,
            port,
            service,
        } => {
            let node = Node::new(config)?;
            node.probe_service(&host, port, &service).await?;
            println!("{}:{} is alive", host, port);
            Ok(())
        }
    }
}

async fn cmd_serve(
    config: NodeConfig,
    topic: &str,
    service: &str,
    period_ms: u64,
    latch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let node = Node::new(config)?;
    let addr = node.start().await?;

    let publisher = node.advertise::<StringMsg>(topic, latch)?;
    node.advertise_service::<AddTwoInts, _>(service, |req| {
        req.a
            .checked_add(req.b)
            .map(|sum| AddTwoIntsResponse { sum })
            .ok_or_else(|| format!("{} + {} overflows", req.a, req.b))
    })?;

    info!("+----------------------------------------------------+");
    info!(
        "|       HDDS TCPROS node v{}                      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Node:    {:40} |", node.caller_id());
    info!("|  Listen:  {:40} |", addr);
    info!("|  Topic:   {:40} |", topic);
    info!("|  Service: {:40} |", service);
    info!("+----------------------------------------------------+");

    let shutdown = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping node...");
        shutdown.shutdown().await;
    });

    let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
    let mut seq: u64 = 0;
    while node.status().is_running() {
        interval.tick().await;
        if !node.status().is_running() {
            break;
        }
        let msg = StringMsg::new(format!("hello world {}", seq));
        let reached = publisher.publish(&msg).await;
        tracing::debug!("Published '{}' to {} subscriber(s)", msg.data, reached);
        seq += 1;
    }

    info!("Node stopped");
    Ok(())
}

async fn cmd_echo(
    config: NodeConfig,
    host: &str,
    port: u16,
    topic: &str,
    count: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let node = Node::new(config)?;
    let sub = node.subscribe::<StringMsg>(topic, None)?;
    let reply = sub.connect(host, port).await?;
    info!(
        "Subscribed to {} ({}) on {}:{}",
        topic,
        reply.get(fields::TYPE).unwrap_or("?"),
        host,
        port
    );

    let shutdown = node.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.shutdown().await;
    });

    let mut received = 0u64;
    while let Some(msg) = sub.recv_while_linked().await {
        println!("data: {}", msg.data);
        received += 1;
        if count > 0 && received >= count {
            break;
        }
    }

    node.shutdown().await;
    Ok(())
}
