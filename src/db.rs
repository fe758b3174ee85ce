use anyhow::Context;

use crate::{config::Config, measurement::Measurement};

/// Sink for finished records. Every call carries exactly one point.
pub trait PointWriter {
    async fn write_point(&self, data: &Measurement) -> Result<(), anyhow::Error>;
}

/// InfluxDB 1.x HTTP API, no authentication.
#[derive(Debug)]
pub struct InfluxDb {
    client: reqwest::Client,
    url: String,
    db: String,
}

impl InfluxDb {
    pub fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.write_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.influxdb_url(),
            db: config.influxdb_db.clone(),
        })
    }

    /// Builds the client and checks that the server answers before returning it.
    pub async fn connect(config: &Config) -> Result<Self, anyhow::Error> {
        let db = Self::new(config)?;
        db.ping().await?;
        Ok(db)
    }

    pub async fn ping(&self) -> Result<(), anyhow::Error> {
        self.client
            .get(format!("{}/ping", self.url))
            .send()
            .await
            .with_context(|| format!("Failed to reach InfluxDB at {}", self.url))?
            .error_for_status()
            .context("InfluxDB ping failed")?;
        Ok(())
    }
}

impl PointWriter for InfluxDb {
    async fn write_point(&self, data: &Measurement) -> Result<(), anyhow::Error> {
        let line = to_line_protocol(data)?;

        let response = self
            .client
            .post(format!("{}/write", self.url))
            .query(&[("db", self.db.as_str()), ("precision", "ns")])
            .body(line)
            .send()
            .await
            .context("Failed to send point to InfluxDB")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "InfluxDB rejected point: {status}: {}",
                body.trim()
            ));
        }

        Ok(())
    }
}

const TAG_SPECIAL: &[char] = &['\\', ',', '=', ' '];

/// Encodes a record as a single line of InfluxDB line protocol.
pub fn to_line_protocol(data: &Measurement) -> Result<String, anyhow::Error> {
    let nanos = data
        .timestamp()
        .timestamp_nanos_opt()
        .context("Timestamp out of range for nanosecond precision")?;

    let mut line = escape(data.name(), &[',', ' ']);
    for (key, value) in data.tags() {
        line.push(',');
        line.push_str(&escape(key, TAG_SPECIAL));
        line.push('=');
        line.push_str(&escape(value, TAG_SPECIAL));
    }

    let fields = data
        .fields()
        .iter()
        .map(|(key, value)| format!("{}={value}", escape(key, &[',', '=', ' '])))
        .collect::<Vec<_>>()
        .join(",");

    line.push(' ');
    line.push_str(&fields);
    line.push(' ');
    line.push_str(&nanos.to_string());

    Ok(line)
}

fn escape(s: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::*;
    use crate::measurement::Reading;

    fn sample(location: &str) -> Measurement {
        let timestamp = DateTime::<Utc>::from_timestamp(1_700_000_000, 123).unwrap();
        Measurement::new(
            "environment",
            BTreeMap::from([("location".to_string(), location.to_string())]),
            timestamp,
            Reading {
                temperature: 22.5,
                pressure: 1013.25,
                altitude: 120.0,
            },
        )
        .unwrap()
    }

    /// Accepts one connection, answers it with `response` and yields the raw request.
    async fn serve_once(response: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);

                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .map(|v| v.trim().parse::<usize>().unwrap())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (port, handle)
    }

    fn local_config(port: u16) -> Config {
        Config {
            influxdb_host: "127.0.0.1".to_string(),
            influxdb_port: port,
            ..Config::default()
        }
    }

    #[test]
    fn test_line_protocol() {
        let line = to_line_protocol(&sample("your_location")).unwrap();
        assert_eq!(
            line,
            "environment,location=your_location temperature=22.5,pressure=1013.25,altitude=120 1700000000000000123"
        );
    }

    #[test]
    fn test_line_protocol_escapes_tags() {
        let line = to_line_protocol(&sample("living room, north=1")).unwrap();
        assert!(
            line.starts_with(r"environment,location=living\ room\,\ north\=1 temperature="),
            "got {line}"
        );
    }

    #[test]
    fn test_line_protocol_escapes_trailing_backslash() {
        let line = to_line_protocol(&sample(r"shed\")).unwrap();
        assert!(
            line.starts_with(r"environment,location=shed\\ temperature="),
            "got {line}"
        );
    }

    #[tokio::test]
    async fn test_write_point() {
        let (port, server) = serve_once("HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n").await;
        let db = InfluxDb::new(&local_config(port)).unwrap();

        db.write_point(&sample("your_location")).await.unwrap();

        let request = server.await.unwrap();
        assert!(
            request.starts_with("POST /write?db=environment&precision=ns HTTP/1.1\r\n"),
            "got {request}"
        );
        assert!(request.ends_with(
            "\r\n\r\nenvironment,location=your_location temperature=22.5,pressure=1013.25,altitude=120 1700000000000000123"
        ));
    }

    #[tokio::test]
    async fn test_write_point_rejected() {
        let (port, server) = serve_once(
            "HTTP/1.1 400 Bad Request\r\ncontent-length: 15\r\nconnection: close\r\n\r\n{\"error\":\"bad\"}",
        )
        .await;
        let db = InfluxDb::new(&local_config(port)).unwrap();

        let err = db.write_point(&sample("your_location")).await.unwrap_err();
        assert!(err.to_string().contains("400"), "got {err}");
        assert!(err.to_string().contains("bad"), "got {err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_pings_server() {
        let (port, server) = serve_once("HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n").await;

        InfluxDb::connect(&local_config(port)).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /ping HTTP/1.1\r\n"), "got {request}");
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(InfluxDb::connect(&local_config(port)).await.is_err());
    }
}
