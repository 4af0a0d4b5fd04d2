use std::time::Duration;

use cytejob_client::{HttpTransport, TransportConfig};
use serde_json::{Value, json};
use wiremock::MockServer;

pub const TEST_TOKEN: &str = "test-secret-token";

pub fn transport_for(server: &MockServer) -> HttpTransport {
    HttpTransport::new(TransportConfig::new(server.uri())).expect("valid test config")
}

pub fn transport_with_read_timeout(server: &MockServer, timeout: Duration) -> HttpTransport {
    HttpTransport::new(TransportConfig::new(server.uri()).with_read_timeout(timeout))
        .expect("valid test config")
}

pub fn results_body() -> Value {
    json!({
        "annotations": [
            {
                "clusterId": "0",
                "latest": {
                    "annotation": {
                        "clusterId": "0",
                        "annotation": "Monocyte",
                        "ontologyTerm": "CL:0000576",
                        "supportingMarkers": ["LYZ", "CD14"],
                        "justification": "Classical monocyte markers"
                    }
                }
            },
            {
                "clusterId": "1",
                "latest": {
                    "annotation": {
                        "clusterId": "1",
                        "annotation": "NK cell",
                        "supportingMarkers": ["NKG7", "GNLY"]
                    }
                }
            }
        ]
    })
}
