use std::{fs, time::Duration};

use acme::{
    api::OrderStatus, Directory, DirectoryUrl, DnsPollOptions, DnsPoller, HickoryResolver,
    PollOptions,
};

const DOMAINS: &[&str] = &["example.org", "*.example.org"];

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Use `DirectoryUrl::LetsEncrypt` for production uses.
    let url = DirectoryUrl::LetsEncryptStaging;

    // Create a directory entrypoint.
    let dir = Directory::fetch(url).await?;

    // Generate a private key and register an account with your ACME provider.
    // You should write it to disk any use `load_existing_account` afterwards.
    let acc = dir.register_account(&["foo@bar.com"]).await?;

    // Example of how to load an account from string:
    let private_key_pem = acc.private_key_pem()?;
    let acc = dir.load_existing_account(&private_key_pem).await?;

    // Order a new TLS certificate for the domains.
    let order = acc.new_order(DOMAINS).await?;

    let poller = DnsPoller::new(HickoryResolver::new()?)
        .on_before_attempt(|attempt| log::info!("checking TXT records, attempt {attempt}"))
        .on_after_fail_attempt(|_, answers| {
            for answer in answers {
                log::info!("{:?} answered {:?}", answer.server, answer.values);
            }
        });

    // If the ownership of the domain(s) have already been authorized in a previous order, you
    // might be able to skip validation. The ACME API provider decides.
    let pending = order
        .authorizations()
        .iter()
        .filter(|auth| auth.need_challenge())
        .map(|auth| {
            auth.find_dns01_challenge()
                .ok_or_else(|| eyre::eyre!("no dns-01 challenge for {}", auth.domain()))
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    // The wildcard and the plain domain share a record name, so the TXT record holds one value
    // per authorization.
    for challenge in &pending {
        let record = challenge.dns_record()?;
        println!("{record}");
    }

    println!("Publish the records above, then press enter.");
    std::io::stdin().read_line(&mut String::new())?;

    let records = pending
        .iter()
        .map(|challenge| challenge.dns_record())
        .collect::<acme::Result<Vec<_>>>()?;

    for record in &records {
        let expected = records
            .iter()
            .filter(|other| other.name == record.name)
            .map(|other| other.content.as_str())
            .collect::<Vec<_>>();

        poller
            .poll_txt_record(&record.name, &expected, &DnsPollOptions::default())
            .await?;
    }

    // The records are visible on every authoritative name server; ask the ACME API to check.
    for challenge in &pending {
        challenge.validate(PollOptions::default()).await?;
    }

    let order = order
        .poll_status(OrderStatus::Ready, PollOptions::default())
        .await?;

    // Ownership is proven. Submit a CSR for a freshly generated key. This causes the ACME provider
    // to enter a state of "processing" that must be polled until the certificate is issued.
    let signing_key = order.finalize().await?;

    let opts = PollOptions {
        interval: Duration::from_secs(2),
        ..PollOptions::default()
    };
    let order = order.poll_status(OrderStatus::Valid, opts).await?;

    // Finally download the certificate.
    let cert = order.download_certificate(&signing_key).await?;

    let validity = cert.validity()?;
    log::info!(
        "certificate valid from {} until {}",
        validity.not_before,
        validity.not_after
    );

    fs::write("cert.pem", cert.certificate())?;
    fs::write("key.pem", cert.private_key())?;

    Ok(())
}
