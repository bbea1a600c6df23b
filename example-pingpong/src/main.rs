use std::{sync::Arc, time::Duration};

use switchboard::{
    BoxError, Call, Context, Endpoint, Error, MemoryTransport, Request, Server, Transport,
    WireError,
};
use switchboard_broker::{BrokerTransport, LocalBroker};

const SERVICE: &str = "service.pingpong";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Ping {
    ping: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Pong {
    pong: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    runtime.block_on(run_main())
}

async fn run_main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let transport: Arc<dyn Transport> = match std::env::var("TRANSPORT")
        .unwrap_or_else(|_| "memory".to_string())
        .as_str()
    {
        "memory" => Arc::new(MemoryTransport::new()),
        "broker" => Arc::new(BrokerTransport::new(Arc::new(LocalBroker::new()))?),
        other => return Err(format!("unknown TRANSPORT {other}, use memory or broker").into()),
    };
    let iterations: usize = std::env::var("ITERATIONS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()?;
    tokio::time::timeout(Duration::from_secs(5), transport.ready().wait()).await??;

    let server = Server::new(SERVICE);
    server.add_endpoints([
        Endpoint::new("ping", |request: Request, ping: Ping| async move {
            log::debug!("ping {} from {:?}", ping.ping, request.context().value("caller"));
            Ok::<_, BoxError>(
                request
                    .reply(Pong { pong: ping.ping })
                    .with_header("X-Served-By", SERVICE),
            )
        }),
        Endpoint::new("refuse", |_request: Request, ping: Ping| async move {
            Err::<switchboard::Reply<Pong>, BoxError>(
                WireError::forbidden("not today")
                    .with_param("ping", ping.ping)
                    .into(),
            )
        }),
    ]);
    server.start(transport.clone())?;
    log::info!("serving {:?}", server);

    let context = Context::new().with_value("caller", "example-pingpong");
    for i in 0..iterations {
        let pong: Option<Pong> = Call::new(SERVICE, "ping")
            .with_body(Ping {
                ping: format!("ping {i}"),
            })
            .with_context(&context)
            .send(transport.as_ref(), Duration::from_secs(1))
            .await?;
        log::info!("{i}: {pong:?}");
    }

    let refused: switchboard::Result<Option<Pong>> = Call::new(SERVICE, "refuse")
        .with_body(Ping {
            ping: "please".to_string(),
        })
        .send(transport.as_ref(), Duration::from_secs(1))
        .await;
    match refused {
        Err(Error::Remote(error)) => log::info!("refused as expected: {} {error}", error.code),
        other => log::warn!("expected a refusal, got {other:?}"),
    }

    server.stop()?;
    transport.tomb().kill("example finished");
    transport.tomb().wait().await;
    Ok(())
}
