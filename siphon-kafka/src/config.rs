use rdkafka::ClientConfig;
use siphon::broker::ConnectOptions;
use uuid::Uuid;

/// 仅 TLS1.2 及以上可协商的 AEAD 套件，TLS1.3 套件由 OpenSSL 另行启用
pub(crate) const TLS12_CIPHERS: &str = "ECDHE+AESGCM:ECDHE+CHACHA20";

/// 消费组为空时生成独立的组
pub(crate) fn group_id(group: &str) -> String {
    if group.is_empty() {
        format!("siphon-{}", Uuid::new_v4())
    } else {
        group.to_string()
    }
}

pub(crate) fn client_config(opts: &ConnectOptions, group: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", opts.servers.join(","))
        .set("group.id", group_id(group))
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "latest")
        .set(
            "reconnect.backoff.max.ms",
            opts.reconnect_backoff.as_millis().to_string(),
        );
    if let (true, Some(transport)) = (opts.secure, opts.transport.as_ref()) {
        config
            .set("security.protocol", "ssl")
            .set("ssl.certificate.pem", &transport.cert_pem)
            .set("ssl.key.pem", &transport.key_pem)
            .set("ssl.ca.pem", &transport.ca_pem)
            .set("ssl.cipher.suites", TLS12_CIPHERS);
        if !transport.verify_host {
            config
                .set("enable.ssl.certificate.verification", "false")
                .set("ssl.endpoint.identification.algorithm", "none");
        }
    }
    config
}
