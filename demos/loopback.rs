// demos/loopback.rs - Local Request/Reply Round Trip
//
// Starts two endpoints on localhost. The responder answers every REQUEST
// with an AGREE followed by an INFORM; the requester fires one request and
// awaits the terminal reply through its conversation manager.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fipa_acl_mtp::prelude::*;
use fipa_acl_mtp::transport::{acc_url, AclSender};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let requester_aid = AgentIdentifier::new("requester@demo")
        .with_address(format!("http://127.0.0.1:{}/acc", free_port().await?));
    let responder_aid = AgentIdentifier::new("responder@demo")
        .with_address(format!("http://127.0.0.1:{}/acc", free_port().await?));

    let requester = CommEndpoint::start(
        requester_aid.clone(),
        EndpointConfig::default().with_bind_host("127.0.0.1"),
    )
    .await?;
    let responder = CommEndpoint::start(
        responder_aid.clone(),
        EndpointConfig::default().with_bind_host("127.0.0.1"),
    )
    .await?;

    // Answer REQUESTs over a raw client, AGREE first, then the result.
    let client = Arc::new(HttpMtpClient::new());
    let own_aid = responder_aid.clone();
    responder.register_handler(
        MessageTemplate::new().with_performative(Performative::Request),
        move |sender, request| {
            let client = Arc::clone(&client);
            let own_aid = own_aid.clone();
            async move {
                info!(
                    from = %sender,
                    content = request.content.as_deref().unwrap_or(""),
                    "request received"
                );
                let url = acc_url(&sender)?;

                let agree = request
                    .create_reply(Performative::Agree)
                    .with_sender(own_aid.clone());
                client.send_acl(&sender, &own_aid, &agree, &url).await?;

                let inform = request
                    .create_reply(Performative::Inform)
                    .with_sender(own_aid.clone())
                    .with_content("((temperature 21))");
                client.send_acl(&sender, &own_aid, &inform, &url).await?;
                Ok(())
            }
        },
    );

    let reply = requester
        .conversations()
        .send_request(
            RequestSpec::new(
                requester_aid,
                responder_aid,
                "((measure temperature))",
            )
            .with_timeout(Duration::from_secs(5)),
        )
        .await?
        .await?;

    info!(
        performative = %reply.performative,
        content = reply.content.as_deref().unwrap_or(""),
        "terminal reply"
    );

    responder.shutdown().await;
    requester.shutdown().await;
    Ok(())
}

async fn free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}
