use std::{env, fs, time::Duration};

use cmp::{
    Client, ClientConfig, Enrollment, MacProtection, Protection, SenderKey, ServerUrl,
    TransactionOptions,
};
use eyre::WrapErr as _;

const PRIMARY_NAME: &str = "device.example.org";

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    // e.g. `http://127.0.0.1:8080/pkix/` for a local test CA
    let server = match env::var("CMP_SERVER") {
        Ok(url) => ServerUrl::Other(url),
        Err(_) => ServerUrl::with_label("ca.example.org", "devices"),
    };

    // Reference and shared secret handed out by the CA operator for the first enrollment.
    let reference = env::var("CMP_REFERENCE").wrap_err("CMP_REFERENCE not set")?;
    let secret = env::var("CMP_SECRET").wrap_err("CMP_SECRET not set")?;

    let mut config = ClientConfig::builder()
        .server(server)
        .sender(format!("CN={PRIMARY_NAME}").parse()?)
        .protection(Protection::Mac(MacProtection::new(reference, secret)))
        .options(TransactionOptions {
            implicit_confirm: true,
            total_timeout: Some(Duration::from_secs(10 * 60)),
            ..Default::default()
        });

    // Some CAs route requests by the recipient name, e.g. `CN=Device Issuing CA`.
    if let Ok(recipient) = env::var("CMP_RECIPIENT") {
        config = config.recipient(recipient.parse()?);
    }

    let client = Client::new(config.build()?)?;

    // Generate the key to be certified. Keep it, it is never sent to the CA.
    let enrollment = Enrollment::new(SenderKey::generate())
        .with_subject(format!("CN={PRIMARY_NAME}").parse()?)
        .with_dns_names(&[PRIMARY_NAME, "www.device.example.org"]);

    // For a CA that keeps the client waiting, `Client::run_transaction` with a context from
    // `Client::new_context` allows taking a snapshot and resuming the poll later.
    let issued = client.initialize(enrollment).await?;

    log::info!(
        "certificate issued with status {}, valid for {} days",
        issued.status(),
        issued.valid_days_left()?
    );

    fs::write("key.pem", issued.private_key_pem()?.as_bytes())?;
    fs::write("cert.pem", issued.certificate_pem()?)?;
    fs::write("chain.pem", issued.chain_pem()?)?;

    Ok(())
}
