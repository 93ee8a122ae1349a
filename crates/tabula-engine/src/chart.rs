//! Chart spec encoding for chart cells.
//!
//! Cell code builds a chart with
//! `S.chart(kind, top, left, bottom, right[, title[, x_label, y_label]])`.
//! The result is a tagged string. A front end recognises it with
//! [`ChartSpec::parse`] and renders it; the engine itself draws nothing.

use crate::engine::Block;

pub const CHART_PREFIX: &str = "@CHART:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
}

impl ChartKind {
    pub fn as_tag(self) -> &'static str {
        match self {
            ChartKind::Bar => "BAR",
            ChartKind::Line => "LINE",
            ChartKind::Scatter => "SCATTER",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "BAR" => Some(ChartKind::Bar),
            "LINE" | "PLOT" => Some(ChartKind::Line),
            "SCATTER" => Some(ChartKind::Scatter),
            _ => None,
        }
    }
}

/// Data block and labels of a chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub area: Block,
    pub sheet: usize,

    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
}

impl ChartSpec {
    pub fn new(kind: ChartKind, area: Block, sheet: usize) -> Self {
        ChartSpec {
            kind,
            area,
            sheet,
            title: None,
            x_label: None,
            y_label: None,
        }
    }

    /// Check that the data block fits the chart kind.
    pub fn validate(&self) -> Result<(), String> {
        let cols = self.area.right - self.area.left + 1;
        match self.kind {
            ChartKind::Scatter if cols != 2 => Err(format!(
                "SCATTER requires exactly 2 columns (X and Y), got {}",
                cols
            )),
            _ => Ok(()),
        }
    }

    pub fn encode(&self) -> String {
        let base = format!(
            "{}{}:{},{},{},{},{}",
            CHART_PREFIX,
            self.kind.as_tag(),
            self.area.top,
            self.area.left,
            self.area.bottom,
            self.area.right,
            self.sheet
        );
        let labels = [&self.title, &self.x_label, &self.y_label];
        if labels.iter().all(|l| l.as_deref().unwrap_or("").is_empty()) {
            return base;
        }
        let encoded: Vec<String> = labels
            .iter()
            .map(|l| percent_encode(l.as_deref().unwrap_or("")))
            .collect();
        format!("{}|{}", base, encoded.join("|"))
    }

    pub fn parse(s: &str) -> Option<ChartSpec> {
        let rest = s.trim().strip_prefix(CHART_PREFIX)?;
        let (kind_tag, rest) = rest.split_once(':')?;
        let kind = ChartKind::from_tag(kind_tag)?;

        let (coords, meta) = rest
            .split_once('|')
            .map_or((rest, None), |(a, b)| (a, Some(b)));
        let numbers = coords
            .split(',')
            .map(|n| n.parse::<usize>().ok())
            .collect::<Option<Vec<_>>>()?;
        let [top, left, bottom, right, sheet] = numbers.as_slice() else {
            return None;
        };

        let mut spec = ChartSpec::new(kind, Block::new(*top, *left, *bottom, *right), *sheet);
        if let Some(meta) = meta {
            let mut parts = meta.split('|').map(|p| {
                if p.is_empty() { None } else { percent_decode(p) }
            });
            spec.title = parts.next().flatten();
            spec.x_label = parts.next().flatten();
            spec.y_label = parts.next().flatten();
        }
        Some(spec)
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '|' | ':' | '\n' | '\r' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
