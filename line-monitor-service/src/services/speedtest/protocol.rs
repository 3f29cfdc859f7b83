//! Parsing for the speedtest.net style configuration and server catalog
//! documents.
//!
//! Only the handful of attributes the client needs are read; attribute order
//! inside an element does not matter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static CLIENT_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<client\s([^>]*)>").expect("valid client element pattern"));

static SERVER_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<server\s([^>]*)>").expect("valid server element pattern"));

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][\w.-]*)\s*=\s*"([^"]*)""#).expect("valid attribute pattern")
});

/// What the measurement service reports about the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfiguration {
    /// Public address the service saw the request come from.
    pub public_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub isp: Option<String>,
}

/// One measurement endpoint from the server catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub country: String,
    /// Upload script URL, e.g. `http://host/speedtest/upload.php`.
    pub url: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Endpoint {
    /// Directory holding the endpoint's test resources.
    pub fn base_url(&self) -> &str {
        let trimmed = self.url.trim_end_matches('/');
        let path_start = trimmed.find("://").map(|i| i + 3).unwrap_or(0);
        match trimmed[path_start..].rfind('/') {
            Some(idx) if trimmed[path_start + idx + 1..].contains('.') => {
                &trimmed[..path_start + idx]
            }
            _ => trimmed,
        }
    }

    pub fn latency_url(&self) -> String {
        format!("{}/latency.txt", self.base_url())
    }

    pub fn download_url(&self, size: u32) -> String {
        format!("{}/random{size}x{size}.jpg", self.base_url())
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload.php", self.base_url())
    }
}

/// Parse the configuration document. `None` when it carries no usable
/// `<client>` element.
pub fn parse_configuration(document: &str) -> Option<ServiceConfiguration> {
    let element = CLIENT_ELEMENT.captures(document)?;
    let attrs = attributes(element.get(1)?.as_str());

    let public_address = attrs.get("ip").filter(|ip| !ip.is_empty())?.clone();
    let latitude = attrs.get("lat")?.trim().parse::<f64>().ok()?;
    let longitude = attrs.get("lon")?.trim().parse::<f64>().ok()?;
    let isp = attrs.get("isp").filter(|isp| !isp.is_empty()).cloned();

    Some(ServiceConfiguration {
        public_address,
        latitude,
        longitude,
        isp,
    })
}

/// Parse the server catalog, keeping document order. Entries missing a URL or
/// coordinates are skipped.
pub fn parse_catalog(document: &str) -> Vec<Endpoint> {
    SERVER_ELEMENT
        .captures_iter(document)
        .filter_map(|element| {
            let attrs = attributes(element.get(1)?.as_str());
            let url = attrs.get("url").filter(|url| !url.is_empty())?.clone();
            Some(Endpoint {
                latitude: attrs.get("lat")?.trim().parse().ok()?,
                longitude: attrs.get("lon")?.trim().parse().ok()?,
                id: attrs.get("id").cloned().unwrap_or_default(),
                name: attrs.get("name").cloned().unwrap_or_default(),
                country: attrs.get("country").cloned().unwrap_or_default(),
                url,
            })
        })
        .collect()
}

fn attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|cap| (cap[1].to_string(), unescape(&cap[2])))
        .collect()
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<client ip="41.33.10.7" lat="30.0771" lon="31.2859" isp="TE Data" isprating="3.7" rating="0" />
<server-config threadcount="4" />
</settings>"#;

    const SERVERS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<settings><servers>
<server url="http://speed.cairo.example/speedtest/upload.php" lat="30.0444" lon="31.2357" name="Cairo" country="Egypt" cc="EG" sponsor="A &amp; B" id="101" />
<server url="http://speed.alex.example:8080/speedtest/upload.php" lat="31.2001" lon="29.9187" name="Alexandria" country="Egypt" cc="EG" id="102" />
<server lat="1" lon="2" name="no url" id="103" />
</servers></settings>"#;

    #[test]
    fn test_parse_configuration() {
        let config = parse_configuration(CONFIG).unwrap();
        assert_eq!(config.public_address, "41.33.10.7");
        assert_eq!(config.isp.as_deref(), Some("TE Data"));
        assert!((config.latitude - 30.0771).abs() < 1e-9);
        assert!((config.longitude - 31.2859).abs() < 1e-9);
    }

    #[test]
    fn test_configuration_without_client_is_rejected() {
        assert!(parse_configuration("<settings></settings>").is_none());
        assert!(parse_configuration(r#"<client ip="1.2.3.4" lat="x" lon="1" />"#).is_none());
    }

    #[test]
    fn test_attribute_order_does_not_matter() {
        let config =
            parse_configuration(r#"<client isp="Orange" lon="2.5" ip="10.1.1.1" lat="-1.5"/>"#)
                .unwrap();
        assert_eq!(config.public_address, "10.1.1.1");
        assert_eq!(config.latitude, -1.5);
    }

    #[test]
    fn test_parse_catalog_keeps_order_and_skips_incomplete() {
        let endpoints = parse_catalog(SERVERS);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].id, "101");
        assert_eq!(endpoints[0].name, "Cairo");
        assert_eq!(endpoints[1].id, "102");
        assert_eq!(endpoints[1].country, "Egypt");
    }

    #[test]
    fn test_resource_urls_live_beside_upload_script() {
        let endpoints = parse_catalog(SERVERS);
        let alex = &endpoints[1];
        assert_eq!(alex.base_url(), "http://speed.alex.example:8080/speedtest");
        assert_eq!(
            alex.latency_url(),
            "http://speed.alex.example:8080/speedtest/latency.txt"
        );
        assert_eq!(
            alex.download_url(350),
            "http://speed.alex.example:8080/speedtest/random350x350.jpg"
        );
        assert_eq!(
            alex.upload_url(),
            "http://speed.alex.example:8080/speedtest/upload.php"
        );
    }

    #[test]
    fn test_directory_url_is_used_as_is() {
        let endpoint = Endpoint {
            id: "1".into(),
            name: "dir".into(),
            country: String::new(),
            url: "http://10.0.0.1/speedtest/".into(),
            latitude: 0.0,
            longitude: 0.0,
        };
        assert_eq!(endpoint.base_url(), "http://10.0.0.1/speedtest");

        let bare = Endpoint {
            url: "http://10.0.0.1".into(),
            ..endpoint
        };
        assert_eq!(bare.base_url(), "http://10.0.0.1");
    }
}
