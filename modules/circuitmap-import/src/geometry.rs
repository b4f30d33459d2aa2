use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use circuitmap_common::{CircuitMapError, Point3, Result};

/// Skeletonized geometry of one segment as served by the segmentation
/// service. Vertex indices are local to the segment; the graph may be
/// disconnected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentGeometry {
    pub vertices: Vec<Point3>,
    /// One radius per vertex, or empty when the service has none.
    pub radii: Vec<f64>,
    pub edges: Vec<(usize, usize)>,
}

// --- Collaborator traits ---

#[async_trait]
pub trait GeometrySource: Send + Sync {
    async fn skeleton(&self, segment_id: i64) -> Result<SegmentGeometry>;
}

#[async_trait]
pub trait SegmentationSource: Send + Sync {
    /// Segments found under each of `points`, in input order.
    async fn segments_at(&self, points: &[Point3]) -> Result<Vec<Vec<i64>>>;
}

#[async_trait]
impl<G: GeometrySource + ?Sized> GeometrySource for Arc<G> {
    async fn skeleton(&self, segment_id: i64) -> Result<SegmentGeometry> {
        (**self).skeleton(segment_id).await
    }
}

#[async_trait]
impl<S: SegmentationSource + ?Sized> SegmentationSource for Arc<S> {
    async fn segments_at(&self, points: &[Point3]) -> Result<Vec<Vec<i64>>> {
        (**self).segments_at(points).await
    }
}

// --- HTTP client ---

#[derive(Deserialize)]
struct SkeletonResponse {
    vertices: Vec<[f64; 3]>,
    #[serde(default)]
    radius: Vec<f64>,
    #[serde(default)]
    edges: Vec<[usize; 2]>,
}

#[derive(Serialize)]
struct SegmentsRequest<'a> {
    points: &'a [[f64; 3]],
}

#[derive(Deserialize)]
struct SegmentsResponse {
    segments: Vec<Vec<i64>>,
}

/// Client for the segmentation service: skeleton geometry and
/// point-to-segment lookups.
pub struct HttpSegmentation {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSegmentation {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CircuitMapError::unavailable)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(CircuitMapError::invalid(format!(
                "{what}: segmentation service returned {status}: {message}"
            )))
        } else {
            Err(CircuitMapError::unavailable(format!(
                "{what}: segmentation service returned {status}: {message}"
            )))
        }
    }
}

#[async_trait]
impl GeometrySource for HttpSegmentation {
    async fn skeleton(&self, segment_id: i64) -> Result<SegmentGeometry> {
        let endpoint = format!("{}/skeleton/{segment_id}", self.base_url);
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(CircuitMapError::unavailable)?;
        let body: SkeletonResponse = Self::check(resp, "skeleton")
            .await?
            .json()
            .await
            .map_err(CircuitMapError::unavailable)?;

        debug!(
            segment_id,
            vertices = body.vertices.len(),
            edges = body.edges.len(),
            "Fetched segment skeleton"
        );

        Ok(SegmentGeometry {
            vertices: body.vertices.into_iter().map(Point3::from).collect(),
            radii: body.radius,
            edges: body.edges.into_iter().map(|[a, b]| (a, b)).collect(),
        })
    }
}

#[async_trait]
impl SegmentationSource for HttpSegmentation {
    async fn segments_at(&self, points: &[Point3]) -> Result<Vec<Vec<i64>>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let coords: Vec<[f64; 3]> = points.iter().map(|p| p.to_array()).collect();
        let endpoint = format!("{}/segments", self.base_url);

        let resp = self
            .client
            .post(&endpoint)
            .json(&SegmentsRequest { points: &coords })
            .send()
            .await
            .map_err(CircuitMapError::unavailable)?;
        let body: SegmentsResponse = Self::check(resp, "segments")
            .await?
            .json()
            .await
            .map_err(CircuitMapError::unavailable)?;

        if body.segments.len() != points.len() {
            return Err(CircuitMapError::invalid(format!(
                "segmentation service answered {} of {} points",
                body.segments.len(),
                points.len()
            )));
        }
        Ok(body.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_response_tolerates_missing_radii() {
        let body: SkeletonResponse =
            serde_json::from_str(r#"{"vertices": [[1, 2, 3], [4, 5, 6]], "edges": [[0, 1]]}"#)
                .unwrap();
        assert_eq!(body.vertices.len(), 2);
        assert!(body.radius.is_empty());
        assert_eq!(body.edges, vec![[0, 1]]);
    }

    #[test]
    fn base_url_is_normalized() {
        let client = HttpSegmentation::new("http://seg.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://seg.local");
    }
}
