//! Geocoding against an OpenStreetMap Nominatim search endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, GeocodeError, Result};
use crate::provider::{GeocodeProvider, GeocodeQuery};
use crate::types::GeocodeMatch;

/// Public Nominatim instance.
pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

/// A [`GeocodeProvider`] backed by the Nominatim `/search` API.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    search_url: Url,
}

/// One entry of a Nominatim `jsonv2` search response.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    display_name: String,
}

impl NominatimGeocoder {
    /// Creates a geocoder for the instance at `base_url`, identifying itself with `user_agent`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::InvalidOption`] if the URL cannot be parsed or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| ConfigError::InvalidOption {
            option: "base_url".to_string(),
            message: e.to_string(),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let search_url = base.join("search").map_err(|e| ConfigError::InvalidOption {
            option: "base_url".to_string(),
            message: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ConfigError::InvalidOption {
                option: "user_agent".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client, search_url })
    }

    /// Builds the request URL for `query`.
    #[must_use]
    pub fn search_url(&self, query: &GeocodeQuery) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &query.text);
            pairs.append_pair("format", "jsonv2");
            if !query.country_codes.is_empty() {
                pairs.append_pair("countrycodes", &query.country_codes.join(","));
            }
            if query.exactly_one {
                pairs.append_pair("limit", "1");
            }
        }
        url
    }
}

#[async_trait]
impl GeocodeProvider for NominatimGeocoder {
    fn name(&self) -> &str {
        "nominatim"
    }

    async fn geocode(
        &self,
        query: &GeocodeQuery,
    ) -> std::result::Result<Vec<GeocodeMatch>, GeocodeError> {
        let url = self.search_url(query);
        log::debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .timeout(query.timeout)
            .send()
            .await
            .map_err(|e| request_error(query, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Service {
                query: query.text.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| request_error(query, &e))?;
        parse_search_response(&query.text, &body)
    }
}

fn request_error(query: &GeocodeQuery, err: &reqwest::Error) -> GeocodeError {
    if err.is_timeout() {
        GeocodeError::Timeout {
            query: query.text.clone(),
            seconds: query.timeout.as_secs(),
        }
    } else {
        GeocodeError::Transport {
            query: query.text.clone(),
            message: err.to_string(),
        }
    }
}

/// Parses a Nominatim `jsonv2` search body into candidates, in service order.
///
/// # Errors
///
/// Returns [`GeocodeError::InvalidResponse`] if the body is not a JSON array of
/// places or a coordinate is not a number.
pub fn parse_search_response(
    query: &str,
    body: &str,
) -> std::result::Result<Vec<GeocodeMatch>, GeocodeError> {
    let invalid = |message: String| GeocodeError::InvalidResponse {
        query: query.to_string(),
        message,
    };

    let places: Vec<Place> = serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;

    places
        .into_iter()
        .map(|place| -> std::result::Result<GeocodeMatch, GeocodeError> {
            let longitude = place
                .lon
                .parse::<f64>()
                .map_err(|e| invalid(format!("longitude '{}': {e}", place.lon)))?;
            let latitude = place
                .lat
                .parse::<f64>()
                .map_err(|e| invalid(format!("latitude '{}': {e}", place.lat)))?;
            Ok(GeocodeMatch::new(longitude, latitude, place.display_name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MONAS: &str = r#"[{"place_id": 1, "lat": "-6.1753942", "lon": "106.827183", "display_name": "Monas, Jakarta Pusat, Indonesia"}]"#;

    fn query(text: &str, exactly_one: bool) -> GeocodeQuery {
        GeocodeQuery {
            text: text.to_string(),
            country_codes: vec!["id".to_string()],
            exactly_one,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_search_url_carries_filters() {
        let geocoder = NominatimGeocoder::new(DEFAULT_BASE_URL, "geolink-tests").unwrap();
        let url = geocoder.search_url(&query("Jakarta Pusat", true));

        assert_eq!(url.path(), "/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "Jakarta Pusat".to_string())));
        assert!(pairs.contains(&("countrycodes".to_string(), "id".to_string())));
        assert!(pairs.contains(&("limit".to_string(), "1".to_string())));
        assert!(pairs.contains(&("format".to_string(), "jsonv2".to_string())));
    }

    #[test]
    fn test_search_url_keeps_base_path() {
        let geocoder = NominatimGeocoder::new("http://localhost:8080/nominatim", "t").unwrap();
        let url = geocoder.search_url(&query("Bandung", false));
        assert_eq!(url.path(), "/nominatim/search");
        assert!(url.query_pairs().all(|(k, _)| k != "limit"));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = NominatimGeocoder::new("not a url", "t").unwrap_err();
        assert!(err.to_string().starts_with("Invalid base_url option"));
    }

    #[test]
    fn test_parse_multiple_candidates() {
        let body = r#"[
            {"place_id": 1, "lat": "-6.1753942", "lon": "106.827183", "display_name": "Monas, Jakarta Pusat, Indonesia"},
            {"place_id": 2, "lat": "-6.2", "lon": "106.8", "display_name": "Jakarta, Indonesia"}
        ]"#;
        let matches = parse_search_response("Jakarta", body).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].address, "Monas, Jakarta Pusat, Indonesia");
        assert!((matches[0].longitude - 106.827_183).abs() < 1e-9);
        assert!((matches[1].latitude + 6.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_empty_array_is_no_match() {
        assert!(parse_search_response("ZZZNOWHERE123", "[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_search_response("Jakarta", "<html>busy</html>").unwrap_err();
        assert!(matches!(err, GeocodeError::InvalidResponse { .. }));

        let err = parse_search_response(
            "Jakarta",
            r#"[{"lat": "north", "lon": "106.8", "display_name": "x"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("latitude 'north'"));
    }

    async fn geocode_against(
        server: &MockServer,
        query: &GeocodeQuery,
    ) -> std::result::Result<Vec<GeocodeMatch>, GeocodeError> {
        let geocoder = NominatimGeocoder::new(&server.uri(), "geolink-tests").unwrap();
        geocoder.geocode(query).await
    }

    #[tokio::test]
    async fn test_geocode_sends_filters_and_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Monas"))
            .and(query_param("format", "jsonv2"))
            .and(query_param("countrycodes", "id"))
            .and(query_param("limit", "1"))
            .and(header("user-agent", "geolink-tests"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MONAS))
            .expect(1)
            .mount(&server)
            .await;

        let matches = geocode_against(&server, &query("Monas", true)).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].address, "Monas, Jakarta Pusat, Indonesia");
        assert!((matches[0].latitude + 6.175_394_2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_geocode_all_candidates_sends_no_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param_is_missing("limit"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MONAS))
            .expect(1)
            .mount(&server)
            .await;

        let matches = geocode_against(&server, &query("Monas", false)).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_geocode_empty_result_is_no_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let matches = geocode_against(&server, &query("ZZZNOWHERE123", true))
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_geocode_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = geocode_against(&server, &query("Monas", true))
            .await
            .unwrap_err();
        assert!(matches!(err, GeocodeError::Service { status: 429, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_geocode_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let err = geocode_against(&server, &query("Monas", true))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Geocoding service returned HTTP 500 for 'Monas'"
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_geocode_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(MONAS)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut slow = query("Monas", true);
        slow.timeout = Duration::from_millis(100);
        let err = geocode_against(&server, &slow).await.unwrap_err();
        assert!(matches!(err, GeocodeError::Timeout { .. }));
    }
}
