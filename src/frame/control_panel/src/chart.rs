use std::collections::VecDeque;
use std::fmt::Write;

pub const BANDWIDTH_HISTORY_LEN: usize = 60;

/// Rolling download/upload samples in kbps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandwidthHistory {
    pub down: VecDeque<f64>,
    pub up: VecDeque<f64>,
}

impl BandwidthHistory {
    pub fn push(&mut self, down: f64, up: f64) {
        self.down.push_back(down);
        self.up.push_back(up);
        while self.down.len() > BANDWIDTH_HISTORY_LEN {
            self.down.pop_front();
            self.up.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.down.is_empty()
    }
}

pub struct BandwidthChart {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Default for BandwidthChart {
    fn default() -> Self {
        BandwidthChart {
            width: 600.0,
            height: 200.0,
            padding: 20.0,
        }
    }
}

impl BandwidthChart {
    /// SVG with 5 grid lines, a filled area and a line per direction.
    /// An empty svg until there are two samples.
    pub fn render(&self, history: &BandwidthHistory) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        if history.len() < 2 {
            svg.push_str("</svg>");
            return svg;
        }

        let max = history
            .down
            .iter()
            .chain(history.up.iter())
            .cloned()
            .fold(100.0_f64, f64::max);
        let plot_h = self.height - self.padding * 2.0;
        let step_x = (self.width - self.padding * 2.0) / (history.len() - 1) as f64;
        let baseline = self.height - self.padding;

        for i in 0..=4 {
            let y = self.padding + (i as f64 * plot_h) / 4.0;
            let _ = write!(
                svg,
                r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="rgba(255,255,255,0.1)" stroke-width="1"/>"#,
                self.padding,
                y,
                self.width - self.padding,
                y
            );
        }

        let points = |data: &VecDeque<f64>| -> Vec<(f64, f64)> {
            data.iter()
                .enumerate()
                .map(|(i, v)| {
                    let x = self.padding + i as f64 * step_x;
                    let y = baseline - (v / max) * plot_h;
                    (x, y)
                })
                .collect()
        };

        for (data, fill, stroke) in [
            (&history.down, "rgba(226,226,229,0.15)", "rgba(226,226,229,0.9)"),
            (&history.up, "rgba(226,226,229,0.08)", "rgba(226,226,229,0.5)"),
        ] {
            let pts = points(data);
            let line: Vec<String> = pts.iter().map(|(x, y)| format!("{:.1},{:.1}", x, y)).collect();
            let _ = write!(
                svg,
                r#"<polygon points="{:.1},{:.1} {} {:.1},{:.1}" fill="{}"/>"#,
                self.padding,
                baseline,
                line.join(" "),
                self.width - self.padding,
                baseline,
                fill
            );
            let _ = write!(
                svg,
                r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
                line.join(" "),
                stroke
            );
        }
        svg.push_str("</svg>");
        svg
    }
}
