//! Bundle assembly and entry-request processing.
//!
//! Covers searchset bundles with RFC-5988 pagination links,
//! transaction/batch response wrapping, history bundles, and the
//! `METHOD URL` entry-request grammar used by transaction processing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::resource::local_reference;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub link: Vec<BundleLink>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleSearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleSearch {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Bundle {
    fn new(bundle_type: &str) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            bundle_type: bundle_type.to_string(),
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    /// Searchset bundle with a single self link.
    pub fn searchset(resources: Vec<Value>, total: u64, base_url: &str) -> Self {
        let mut bundle = Self::new("searchset");
        bundle.total = Some(total);
        bundle.link.push(BundleLink {
            relation: "self".to_string(),
            url: base_url.to_string(),
        });
        bundle.entry = resources.into_iter().map(match_entry).collect();
        bundle
    }

    /// Searchset bundle with self/next/previous pagination links.
    pub fn searchset_with_links(params: SearchSetParams) -> Self {
        let SearchSetParams {
            resources,
            total,
            base_url,
            offset,
            count,
        } = params;

        let mut bundle = Self::new("searchset");
        bundle.total = Some(total);
        bundle.link.push(BundleLink {
            relation: "self".to_string(),
            url: page_url(&base_url, offset, count),
        });
        if offset + count < total {
            bundle.link.push(BundleLink {
                relation: "next".to_string(),
                url: page_url(&base_url, offset + count, count),
            });
        }
        if offset > 0 {
            let previous = offset.saturating_sub(count);
            bundle.link.push(BundleLink {
                relation: "previous".to_string(),
                url: page_url(&base_url, previous, count),
            });
        }
        bundle.entry = resources.into_iter().map(match_entry).collect();
        bundle
    }

    /// Wrap precomputed entries as a transaction-response bundle.
    pub fn transaction_response(entries: Vec<BundleEntry>) -> Self {
        let mut bundle = Self::new("transaction-response");
        bundle.entry = entries;
        bundle
    }

    /// Wrap precomputed entries as a batch-response bundle.
    pub fn batch_response(entries: Vec<BundleEntry>) -> Self {
        let mut bundle = Self::new("batch-response");
        bundle.entry = entries;
        bundle
    }

    /// History bundle; each entry carries the request that produced it.
    pub fn history(entries: Vec<BundleEntry>, total: u64) -> Self {
        let mut bundle = Self::new("history");
        bundle.total = Some(total);
        bundle.entry = entries;
        bundle
    }

    /// Collection bundle for graph traversal results.
    pub fn collection(resources: Vec<Value>) -> Self {
        let mut bundle = Self::new("collection");
        bundle.entry = resources
            .into_iter()
            .map(|resource| BundleEntry {
                full_url: local_reference(&resource),
                resource: Some(resource),
                ..Default::default()
            })
            .collect();
        bundle
    }
}

fn match_entry(resource: Value) -> BundleEntry {
    BundleEntry {
        full_url: local_reference(&resource),
        resource: Some(resource),
        search: Some(BundleSearch {
            mode: "match".to_string(),
        }),
        ..Default::default()
    }
}

fn page_url(base_url: &str, offset: u64, count: u64) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}_offset={offset}&_count={count}")
}

/// Parameters for a paginated searchset bundle.
#[derive(Debug, Clone)]
pub struct SearchSetParams {
    pub resources: Vec<Value>,
    pub total: u64,
    pub base_url: String,
    pub offset: u64,
    pub count: u64,
}

/// A parsed bundle entry request line: `METHOD (/)?Type(/id)?(?query)?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub method: String,
    pub resource_type: String,
    pub id: Option<String>,
}

/// Parse a `BundleEntry.request` into method, resource type, and id.
///
/// The leading slash and any trailing query string are ignored.
pub fn parse_entry_request(request: &BundleRequest) -> Result<EntryRequest> {
    let method = request.method.trim().to_uppercase();
    if method.is_empty() {
        return Err(CoreError::structure("bundle entry request has no method"));
    }

    let url = request.url.trim();
    let url = url.split('?').next().unwrap_or(url);
    let url = url.trim_start_matches('/');
    if url.is_empty() {
        return Err(CoreError::structure("bundle entry request has no URL"));
    }

    let mut segments = url.split('/');
    let resource_type = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::structure("bundle entry request has no resource type"))?
        .to_string();
    let id = segments.next().filter(|s| !s.is_empty()).map(String::from);

    Ok(EntryRequest {
        method,
        resource_type,
        id,
    })
}

/// Maps entry request methods onto their response statuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleProcessor;

impl BundleProcessor {
    pub fn new() -> Self {
        Self
    }

    /// HTTP status produced by a successful entry of the given method.
    pub fn status_for_method(&self, method: &str) -> Result<u16> {
        match method.to_uppercase().as_str() {
            "POST" => Ok(201),
            "PUT" => Ok(200),
            "DELETE" => Ok(204),
            "GET" => Ok(200),
            other => Err(CoreError::value(
                "request.method",
                format!("unsupported bundle entry method '{other}'"),
            )),
        }
    }

    /// Build the response entry for a processed request.
    pub fn response_entry(&self, method: &str, resource: Option<Value>) -> Result<BundleEntry> {
        let status = self.status_for_method(method)?;
        Ok(BundleEntry {
            full_url: resource.as_ref().and_then(local_reference),
            resource,
            response: Some(BundleResponse {
                status: status.to_string(),
                location: None,
                etag: None,
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: &str) -> Value {
        json!({"resourceType": "Patient", "id": id})
    }

    #[test]
    fn searchset_wraps_entries_as_matches() {
        let bundle = Bundle::searchset(vec![patient("p1"), patient("p2")], 2, "/fhir/Patient");
        assert_eq!(bundle.bundle_type, "searchset");
        assert_eq!(bundle.total, Some(2));
        assert_eq!(bundle.entry.len(), 2);
        assert_eq!(bundle.entry[0].full_url.as_deref(), Some("Patient/p1"));
        assert_eq!(bundle.entry[0].search.as_ref().unwrap().mode, "match");
        assert_eq!(bundle.link.len(), 1);
        assert_eq!(bundle.link[0].relation, "self");
    }

    #[test]
    fn pagination_links_follow_offset_and_total() {
        let bundle = Bundle::searchset_with_links(SearchSetParams {
            resources: vec![patient("p1")],
            total: 30,
            base_url: "/fhir/Patient".to_string(),
            offset: 10,
            count: 10,
        });

        let relations: Vec<&str> = bundle.link.iter().map(|l| l.relation.as_str()).collect();
        assert_eq!(relations, vec!["self", "next", "previous"]);

        let next = bundle.link.iter().find(|l| l.relation == "next").unwrap();
        assert!(next.url.contains("_offset=20"));
        let previous = bundle
            .link
            .iter()
            .find(|l| l.relation == "previous")
            .unwrap();
        assert!(previous.url.contains("_offset=0"));
    }

    #[test]
    fn first_page_has_no_previous_and_last_no_next() {
        let first = Bundle::searchset_with_links(SearchSetParams {
            resources: vec![],
            total: 15,
            base_url: "/fhir/Patient".to_string(),
            offset: 0,
            count: 10,
        });
        assert!(first.link.iter().all(|l| l.relation != "previous"));
        assert!(first.link.iter().any(|l| l.relation == "next"));

        let last = Bundle::searchset_with_links(SearchSetParams {
            resources: vec![],
            total: 15,
            base_url: "/fhir/Patient".to_string(),
            offset: 10,
            count: 10,
        });
        assert!(last.link.iter().all(|l| l.relation != "next"));
    }

    #[test]
    fn previous_offset_clamps_at_zero() {
        let bundle = Bundle::searchset_with_links(SearchSetParams {
            resources: vec![],
            total: 100,
            base_url: "/fhir/Patient".to_string(),
            offset: 5,
            count: 10,
        });
        let previous = bundle
            .link
            .iter()
            .find(|l| l.relation == "previous")
            .unwrap();
        assert!(previous.url.contains("_offset=0"));
    }

    #[test]
    fn searchset_roundtrips_through_json() {
        let bundle = Bundle::searchset(vec![patient("p1")], 1, "/fhir/Patient");
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["resourceType"], "Bundle");
        assert_eq!(json["type"], "searchset");
        assert_eq!(json["total"], 1);
        assert_eq!(json["entry"][0]["resource"]["id"], "p1");

        let parsed: Bundle = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn entry_request_parsing_normalizes_slash_and_query() {
        let cases = [
            ("POST", "Patient", ("POST", "Patient", None)),
            ("PUT", "/Patient/p1", ("PUT", "Patient", Some("p1"))),
            ("GET", "Patient?name=smith", ("GET", "Patient", None)),
            ("delete", "/Patient/p1?x=1", ("DELETE", "Patient", Some("p1"))),
        ];
        for (method, url, (want_method, want_type, want_id)) in cases {
            let parsed = parse_entry_request(&BundleRequest {
                method: method.to_string(),
                url: url.to_string(),
            })
            .unwrap();
            assert_eq!(parsed.method, want_method);
            assert_eq!(parsed.resource_type, want_type);
            assert_eq!(parsed.id.as_deref(), want_id);
        }
    }

    #[test]
    fn empty_entry_request_is_structural_error() {
        let err = parse_entry_request(&BundleRequest {
            method: "POST".to_string(),
            url: "".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.issue_code(), "structure");
    }

    #[test]
    fn processor_maps_methods_to_statuses() {
        let processor = BundleProcessor::new();
        assert_eq!(processor.status_for_method("POST").unwrap(), 201);
        assert_eq!(processor.status_for_method("PUT").unwrap(), 200);
        assert_eq!(processor.status_for_method("DELETE").unwrap(), 204);
        assert_eq!(processor.status_for_method("GET").unwrap(), 200);
        assert!(processor.status_for_method("TRACE").is_err());
    }

    #[test]
    fn transaction_response_tags_its_type() {
        let processor = BundleProcessor::new();
        let entry = processor.response_entry("POST", Some(patient("p1"))).unwrap();
        let bundle = Bundle::transaction_response(vec![entry]);
        assert_eq!(bundle.bundle_type, "transaction-response");
        assert_eq!(
            bundle.entry[0].response.as_ref().unwrap().status,
            "201"
        );
    }
}
