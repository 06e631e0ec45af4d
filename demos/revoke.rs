use std::{env, fs};

use cmp::{
    Client, ClientConfig, Protection, RevocationReason, SenderKey, ServerUrl,
    SignatureProtection, Trust,
};
use der::DecodePem as _;
use eyre::WrapErr as _;
use x509_cert::Certificate;

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let server = match env::var("CMP_SERVER") {
        Ok(url) => ServerUrl::Other(url),
        Err(_) => ServerUrl::with_label("ca.example.org", "devices"),
    };

    // Key and certificate written by the `enroll` example.
    let key = SenderKey::from_pem(&fs::read_to_string("key.pem").wrap_err("read key.pem")?)?;
    let cert_pem = fs::read_to_string("cert.pem").wrap_err("read cert.pem")?;
    let cert = Certificate::from_pem(&cert_pem)?;

    // The CA's protection certificate, to check its signed responses.
    let ca_cert = Certificate::from_pem(&fs::read_to_string("ca.pem").wrap_err("read ca.pem")?)?;

    let config = ClientConfig::builder()
        .server(server)
        .sender(cert.tbs_certificate.subject.clone())
        .recipient(ca_cert.tbs_certificate.subject.clone())
        .protection(Protection::Signature(SignatureProtection::new(
            key,
            cert.clone(),
        )?))
        .trust(Trust::default().pin_server_cert(ca_cert))
        .build()?;

    let client = Client::new(config)?;

    let status = client
        .revoke(&cert, RevocationReason::CessationOfOperation)
        .await?;

    log::info!("revocation answered with {status}");

    Ok(())
}
