use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;

use chatframe::dialect::{Dialect, RoundNumbering};
use chatframe::history::ConversationHistory;
use chatframe::mock::{MockModel, MockTokenizer};
use chatframe::openai::{handle_request, ServerContext};
use chatframe::service::ChatService;
use chatframe::{cli, log_info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    Round0,
    Round1,
    Tagged,
    RoleBlock,
    TokenNative,
}

#[derive(Parser, Debug)]
#[command(name = "chatframe-server", about = "Chat-completions server and CLI")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8080)]
    port: u16,

    #[arg(long, value_enum, default_value_t = DialectArg::TokenNative)]
    dialect: DialectArg,

    /// System prompt for the role-block dialect.
    #[arg(long, default_value = "You are a helpful assistant.")]
    system: String,

    /// Token window for the role-block dialect's history limiting.
    #[arg(long, default_value_t = 6144)]
    max_window_size: usize,

    /// Model name reported in completion responses.
    #[arg(long, default_value = "chatframe-mock")]
    model_name: String,

    /// Scripted reply for the built-in mock backend.
    #[arg(long, default_value = "\nHello! This is a mock completion.")]
    reply: String,

    /// Run the interactive terminal loop instead of the HTTP server.
    #[arg(long)]
    interactive: bool,
}

impl Args {
    fn dialect(&self) -> Dialect {
        match self.dialect {
            DialectArg::Round0 => Dialect::Round {
                numbering: RoundNumbering::ZeroIndexed,
            },
            DialectArg::Round1 => Dialect::Round {
                numbering: RoundNumbering::OneIndexed,
            },
            DialectArg::Tagged => Dialect::Tagged,
            DialectArg::RoleBlock => Dialect::RoleBlock {
                system: self.system.clone(),
                max_window_size: self.max_window_size,
            },
            DialectArg::TokenNative => Dialect::TokenNative,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let service = ChatService::new(
        Arc::new(MockModel::new(&args.reply)),
        Arc::new(MockTokenizer),
        args.dialect(),
    );

    if args.interactive {
        // the interactive loop blocks on the delta channel; it must stay off
        // the async executor's threads
        let mut history = ConversationHistory::new();
        cli::run(&service, &mut history)?;
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(serve(args, service))
}

async fn serve(args: Args, service: ChatService) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;

    let ctx = Arc::new(ServerContext::new(service, args.model_name.clone()));
    let make_svc = make_service_fn({
        let ctx = ctx.clone();
        move |_conn| {
            let ctx = ctx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(req, ctx.clone())))
            }
        }
    });

    log_info!("listening on http://{addr} (model: {})", args.model_name);
    println!("chatframe-server listening on http://{addr}");
    println!("  GET  /health");
    println!("  POST /v1/chat/completions");

    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("server error")?;
    Ok(())
}
