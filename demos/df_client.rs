// demos/df_client.rs - Directory Facilitator Round Trip
//
// Registers this process with a platform DF, searches the directory, then
// deregisters. Point it at a running platform:
//
//   cargo run --example df_client -- http://platform:7778/acc [own-acc-url]
//
// The second argument is the callback address peers reach this process
// under; it defaults to http://127.0.0.1:7777/acc and must be routable
// from the platform for replies to arrive.

use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fipa_acl_mtp::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let df_url = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:7778/acc".to_string());
    let own_url = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:7777/acc".to_string());

    let my_aid = AgentIdentifier::new("rust-probe@demo").with_address(own_url);
    // The name only matters for classifying unsolicited DF traffic; the
    // verbs themselves go to the URL.
    let df_aid = AgentIdentifier::new("df@platform").with_address(df_url);

    let endpoint = CommEndpoint::start(
        my_aid,
        EndpointConfig::default().with_df_aid(df_aid),
    )
    .await?;
    let df = endpoint.df_client()?.with_timeout(Duration::from_secs(10));

    let description = DfAgentDescription::new()
        .with_name(endpoint.my_aid().clone())
        .with_service(
            ServiceDescription::new()
                .with_name("probe")
                .with_type("diagnostic")
                .with_property("impl", "rust"),
        );
    df.register(&description).await?;
    info!(df = %df.df_aid(), "registered");

    let hits = df
        .search(
            &DfAgentDescription::new(),
            &SearchConstraints::with_max_results(25),
        )
        .await?;
    info!(count = hits.len(), "directory entries");
    for hit in &hits {
        match hit {
            Description::Agent(agent) => info!(
                name = agent.name.as_ref().map(|aid| aid.name.as_str()).unwrap_or("?"),
                services = agent.services.len(),
                "agent"
            ),
            Description::Service(service) => info!(
                name = service.name.as_deref().unwrap_or("?"),
                service_type = service.service_type.as_deref().unwrap_or("?"),
                "service"
            ),
        }
    }

    df.deregister().await?;
    info!("deregistered");

    endpoint.shutdown().await;
    Ok(())
}
