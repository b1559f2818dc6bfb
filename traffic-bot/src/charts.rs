pub mod svg;

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use resvg::{tiny_skia, usvg};
use tokio::task;
use tracing::debug;

use crate::error::RenderError;
use crate::report::TrafficReport;
use crate::timezone::DisplayZone;

/// Rendered chart ready to attach to a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

static FONTS: LazyLock<Arc<usvg::fontdb::Database>> = LazyLock::new(|| {
    let mut fonts = usvg::fontdb::Database::new();
    fonts.load_system_fonts();
    debug!("Loaded {} font faces for chart text", fonts.len());
    Arc::new(fonts)
});

/// Draw the report as SVG and rasterize it to PNG on the blocking pool.
pub async fn render(report: &TrafficReport, zone: DisplayZone) -> Result<ChartImage, RenderError> {
    let markup = svg::render_traffic_chart(report, zone).into_string();
    let bytes = task::spawn_blocking(move || rasterize(&markup)).await??;

    Ok(ChartImage {
        file_name: format!("traffic-{}.png", report.period.token()),
        bytes,
    })
}

pub fn rasterize(markup: &str) -> Result<Vec<u8>, RenderError> {
    let options = usvg::Options {
        fontdb: Arc::clone(&FONTS),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(markup, &options)?;

    let size = tree.size().to_int_size();
    let (width, height) = (size.width(), size.height());
    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or(RenderError::Canvas { width, height })?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| RenderError::Encode(e.to_string()))
}

/// Split a series wherever consecutive points are further apart than one
/// bucket, so collection outages show up as breaks in the line.
pub fn contiguous_runs(
    points: &[(DateTime<Utc>, f64)],
    interval_seconds: u32,
) -> Vec<&[(DateTime<Utc>, f64)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..points.len() {
        let step = (points[i].0 - points[i - 1].0).num_seconds();
        if step > i64::from(interval_seconds) {
            runs.push(&points[start..i]);
            start = i;
        }
    }
    if start < points.len() {
        runs.push(&points[start..]);
    }
    runs
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn splits_on_missing_buckets() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let points: Vec<_> = [0, 1, 2, 5, 6, 9]
            .into_iter()
            .map(|m| (t0 + Duration::minutes(m), 1.0))
            .collect();
        let runs = contiguous_runs(&points, 60);
        let lens: Vec<usize> = runs.iter().map(|r| r.len()).collect();
        assert_eq!(lens, [3, 2, 1]);
        assert!(contiguous_runs(&[], 60).is_empty());
    }

    #[test]
    fn rasterizes_to_png() {
        let png = rasterize(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20"><rect width="40" height="20" style="fill: #fff"/></svg>"##,
        )
        .unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn broken_markup_is_a_render_error() {
        assert!(matches!(
            rasterize("<svg"),
            Err(RenderError::Markup(_))
        ));
    }
}
