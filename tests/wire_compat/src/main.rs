fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use formrelay_protocol::{CallbackPayload, ErrorReport, StartedResponse, UploadRequest};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes numbers so that integer-valued floats compare equal.
    ///
    /// JavaScript callers send `1048576` for a rate; Rust serializes the
    /// `f64` back as `1048576.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_upload_request() {
        let req = roundtrip_test::<UploadRequest>("upload_request.json");
        assert_eq!(req.title(), Some("q3.pdf"));
        assert_eq!(req.rate_limit_bytes_per_second, Some(1_048_576.0));
    }

    #[test]
    fn fixture_upload_request_minimal() {
        let req = roundtrip_test::<UploadRequest>("upload_request_minimal.json");
        assert_eq!(req.rate_limit_bytes_per_second, None);
    }

    #[test]
    fn upload_request_metadata_keeps_key_order() {
        let req: UploadRequest = serde_json::from_value(load_fixture("upload_request.json")).unwrap();
        let keys: Vec<&str> = req.metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, ["Title", "PathOnClient", "FirstPublishLocationId"]);
    }

    #[test]
    fn fixture_callback_success() {
        let payload = roundtrip_test::<CallbackPayload>("callback_success.json");
        assert!(payload.is_success());
    }

    #[test]
    fn fixture_callback_download_failure() {
        let payload = roundtrip_test::<CallbackPayload>("callback_download_failure.json");
        let error = payload.error.unwrap();
        assert_eq!(error.message, "Failed to download the file");
        assert_eq!(error.status, Some(404));
    }

    #[test]
    fn fixture_callback_upload_failure() {
        let payload = roundtrip_test::<CallbackPayload>("callback_upload_failure.json");
        assert!(payload.result.is_none());
        assert_eq!(payload.error.unwrap().status, Some(400));
    }

    #[test]
    fn fixture_callback_cancelled() {
        let payload = roundtrip_test::<CallbackPayload>("callback_cancelled.json");
        assert_eq!(payload.error, Some(ErrorReport::new("cancelled")));
    }

    #[test]
    fn fixture_started_response() {
        let resp = roundtrip_test::<StartedResponse>("started_response.json");
        assert_eq!(resp.job_id.len(), 36);
    }

    #[test]
    fn legacy_started_response_without_job_id() {
        let resp: StartedResponse =
            serde_json::from_str(r#"{"startedAt":"2024-03-01T09:30:00.123Z"}"#).unwrap();
        assert!(resp.job_id.is_empty());
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"startedAt":"2024-03-01T09:30:00.123Z"}"#
        );
    }

    #[test]
    fn callback_always_carries_both_fields() {
        let text = serde_json::to_string(&CallbackPayload::failure(ErrorReport::new("x"))).unwrap();
        assert_eq!(text, r#"{"error":{"message":"x"},"result":null}"#);
    }
}
