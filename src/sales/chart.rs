//! Line chart rendering for sales trends.
//!
//! Charts are emitted as a small self-contained SVG and returned as a
//! base64 data URI that can be embedded directly in a chat message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub const DATA_URI_PREFIX: &str = "data:image/svg+xml;base64,";

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 360.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 40.0;

/// Renders labeled values as an SVG line chart data URI.
pub fn render_line_chart(title: &str, points: &[(String, f64)]) -> String {
    let svg = render_svg(title, points);
    format!("{}{}", DATA_URI_PREFIX, BASE64.encode(svg))
}

fn render_svg(title: &str, points: &[(String, f64)]) -> String {
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let baseline = HEIGHT - MARGIN_BOTTOM;

    let max = points.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max);
    let min = points.iter().map(|(_, v)| *v).fold(f64::MAX, f64::min);
    let span = if (max - min).abs() < f64::EPSILON {
        1.0
    } else {
        max - min
    };

    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, (_, value))| {
            let x = if points.len() > 1 {
                MARGIN_LEFT + plot_width * i as f64 / (points.len() - 1) as f64
            } else {
                MARGIN_LEFT + plot_width / 2.0
            };
            let y = baseline - plot_height * (value - min) / span;
            (x, y)
        })
        .collect();

    let polyline = coords
        .iter()
        .map(|(x, y)| format!("{:.1},{:.1}", x, y))
        .collect::<Vec<_>>()
        .join(" ");

    let markers = coords
        .iter()
        .map(|(x, y)| {
            format!(
                r##"<circle cx="{:.1}" cy="{:.1}" r="3" fill="#2b6cb0"/>"##,
                x, y
            )
        })
        .collect::<String>();

    let first_label = points.first().map(|(l, _)| l.as_str()).unwrap_or("");
    let last_label = points.last().map(|(l, _)| l.as_str()).unwrap_or("");

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<rect width="{w}" height="{h}" fill="white"/>"#,
            r#"<text x="{tx}" y="24" text-anchor="middle" font-size="16" font-family="sans-serif">{title}</text>"#,
            r##"<line x1="{ml}" y1="{bl}" x2="{xr}" y2="{bl}" stroke="#888" stroke-width="1"/>"##,
            r##"<line x1="{ml}" y1="{mt}" x2="{ml}" y2="{bl}" stroke="#888" stroke-width="1"/>"##,
            r#"<text x="{ml_less}" y="{mt_text}" text-anchor="end" font-size="11" font-family="sans-serif">{max:.0}</text>"#,
            r#"<text x="{ml_less}" y="{bl}" text-anchor="end" font-size="11" font-family="sans-serif">{min:.0}</text>"#,
            r#"<text x="{ml}" y="{xl_text}" text-anchor="start" font-size="11" font-family="sans-serif">{first}</text>"#,
            r#"<text x="{xr}" y="{xl_text}" text-anchor="end" font-size="11" font-family="sans-serif">{last}</text>"#,
            r##"<polyline points="{polyline}" fill="none" stroke="#2b6cb0" stroke-width="2"/>"##,
            "{markers}",
            "</svg>"
        ),
        w = WIDTH,
        h = HEIGHT,
        tx = WIDTH / 2.0,
        title = escape_xml(title),
        ml = MARGIN_LEFT,
        ml_less = MARGIN_LEFT - 6.0,
        mt = MARGIN_TOP,
        mt_text = MARGIN_TOP + 4.0,
        bl = baseline,
        xr = WIDTH - MARGIN_RIGHT,
        xl_text = baseline + 16.0,
        max = max,
        min = min,
        first = escape_xml(first_label),
        last = escape_xml(last_label),
        polyline = polyline,
        markers = markers,
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
