//! 命令行演示：`cargo run -p spark-https --example fetch -- <url> [method] [postdata]`。
//!
//! 日志级别由 `RUST_LOG` 控制，缺省为 `info`。

use std::process::ExitCode;

use spark_https::{ClientConfig, ClientRegistry, Method, Request};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: fetch <url> [method] [postdata]");
        return ExitCode::from(2);
    };

    let mut request = Request::new(url);
    if let Some(method) = args.next() {
        match method.parse::<Method>() {
            Ok(method) => request.method = Some(method),
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::from(2);
            }
        }
    }
    if let Some(data) = args.next() {
        request.postdata = data.into_bytes();
    }

    let registry = ClientRegistry::platform_default(ClientConfig::default());
    match registry.request(&request) {
        Ok(reply) => {
            println!("{}", reply.response_code);
            for (name, value) in reply.headers.iter() {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", reply.text());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("request failed [{}]: {err}", err.code());
            ExitCode::FAILURE
        }
    }
}
