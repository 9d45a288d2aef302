use std::sync::Arc;
use std::time::Duration;

use egui::{self, Align2, Color32, FontId, Rounding, Stroke};

use crate::config::{StreamConfig, YRange};
use crate::producer::{ProducerExit, ProducerStats};
use crate::ring::{RingBuffer, Snapshot};
use crate::shutdown::{ShutdownReason, ShutdownWaiter};

const ACCENT: Color32 = Color32::from_rgb(80, 220, 120);
const GRID: Color32 = Color32::from_rgb(45, 45, 45);
const PLOT_HEIGHT: f32 = 320.0;
const Y_DIVISIONS: usize = 4;

/// Live scrolling view of the ring. Only ever reads snapshots.
pub struct MonitorApp {
    ring: Arc<RingBuffer>,
    stats: Arc<ProducerStats>,
    waiter: ShutdownWaiter,
    title: String,
    input_label: String,
    window_seconds: f64,
    refresh: Duration,
    y_range: YRange,
}

impl MonitorApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: &StreamConfig,
        ring: Arc<RingBuffer>,
        stats: Arc<ProducerStats>,
        waiter: ShutdownWaiter,
    ) -> Self {
        apply_monitor_theme(&cc.egui_ctx);
        Self {
            ring,
            stats,
            waiter,
            title: format!("Real-Time ECG (Last {} Seconds)", config.window_seconds),
            input_label: config.input_label(),
            window_seconds: config.window_seconds as f64,
            refresh: config.refresh,
            y_range: config.y_range,
        }
    }
}

impl eframe::App for MonitorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(self.refresh);
        if let Some(ShutdownReason::Interrupt) = self.waiter.poll() {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let snapshot = self.ring.snapshot();
        let stats = self.stats.snapshot();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                ui.strong(&self.title);
                ui.separator();
                ui.label(&self.input_label);
            });
            ui.add_space(6.0);

            signal_card(ui, &snapshot, self.ring.capacity(), stats.exit.as_ref(), |ui| {
                draw_trace(ui, &snapshot, self.window_seconds, self.y_range)
            });
            ui.add_space(8.0);

            ui.horizontal(|ui| {
                ui.label(format!("Accepted {}", stats.accepted));
                ui.separator();
                ui.label(format!("Malformed {}", stats.malformed));
                ui.separator();
                ui.label(format!("Published {}", stats.published));
                if stats.publish_failed > 0 {
                    ui.separator();
                    ui.colored_label(
                        Color32::YELLOW,
                        format!("Publish failures {}", stats.publish_failed),
                    );
                }
            });
        });
    }
}

fn draw_trace(ui: &mut egui::Ui, snapshot: &Snapshot, window_seconds: f64, y_range: YRange) {
    let desired = egui::vec2(ui.available_width().max(200.0), PLOT_HEIGHT);
    let (rect, _) = ui.allocate_exact_size(desired, egui::Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect(
        rect,
        Rounding::same(6.0),
        ui.visuals().faint_bg_color,
        Stroke::new(1.0, ui.visuals().weak_text_color()),
    );

    let (y_lo, y_hi) = vertical_bounds(y_range, snapshot);
    draw_grid(&painter, rect, window_seconds, (y_lo, y_hi), ui.visuals().weak_text_color());

    if snapshot.len() < 2 {
        painter.text(
            rect.center(),
            Align2::CENTER_CENTER,
            "Waiting for samples...",
            FontId::proportional(14.0),
            ui.visuals().weak_text_color(),
        );
        return;
    }

    let buckets = rect.width().max(1.0) as usize;
    let points: Vec<egui::Pos2> = decimate(snapshot, buckets)
        .into_iter()
        .filter(|(t, _)| *t >= -window_seconds)
        .map(|(t, v)| {
            let x = egui::lerp(rect.x_range(), (1.0 + t / window_seconds) as f32);
            let norm = ((v - y_lo) / (y_hi - y_lo)).clamp(0.0, 1.0);
            let y = egui::lerp(rect.y_range(), 1.0 - norm);
            egui::pos2(x, y)
        })
        .collect();
    painter.add(egui::Shape::line(points, Stroke::new(1.5, ACCENT)));
}

fn draw_grid(
    painter: &egui::Painter,
    rect: egui::Rect,
    window_seconds: f64,
    (y_lo, y_hi): (f32, f32),
    label_color: Color32,
) {
    let stroke = Stroke::new(1.0, GRID);
    let whole_seconds = window_seconds.floor() as i64;
    for second in 0..=whole_seconds {
        let t = 1.0 - second as f64 / window_seconds;
        let x = egui::lerp(rect.x_range(), t as f32);
        painter.line_segment([egui::pos2(x, rect.min.y), egui::pos2(x, rect.max.y)], stroke);
        painter.text(
            egui::pos2(x + 2.0, rect.max.y - 2.0),
            Align2::LEFT_BOTTOM,
            format!("-{second} s"),
            FontId::monospace(10.0),
            label_color,
        );
    }
    for i in 0..=Y_DIVISIONS {
        let frac = i as f32 / Y_DIVISIONS as f32;
        let y = egui::lerp(rect.y_range(), 1.0 - frac);
        painter.line_segment([egui::pos2(rect.min.x, y), egui::pos2(rect.max.x, y)], stroke);
        painter.text(
            egui::pos2(rect.min.x + 2.0, y),
            Align2::LEFT_CENTER,
            format!("{:.0}", egui::lerp(y_lo..=y_hi, frac)),
            FontId::monospace(10.0),
            label_color,
        );
    }
}

/// Vertical extent of the plot. Auto-scale pads the visible range by 5%.
pub fn vertical_bounds(y_range: YRange, snapshot: &Snapshot) -> (f32, f32) {
    match y_range {
        YRange::Fixed { min, max } => (min, max),
        YRange::Auto => match snapshot.value_range() {
            Some((lo, hi)) if hi > lo => {
                let pad = (hi - lo) * 0.05;
                (lo - pad, hi + pad)
            }
            Some((v, _)) => (v - 1.0, v + 1.0),
            None => (-1.0, 1.0),
        },
    }
}

/// Reduces a snapshot to at most two points (min and max, in time order) per
/// bucket so dense windows keep their peaks. Times are relative to the newest
/// sample.
pub fn decimate(snapshot: &Snapshot, buckets: usize) -> Vec<(f64, f32)> {
    let times = snapshot.relative_to_latest();
    let n = snapshot.values.len();
    if buckets == 0 || n <= buckets.saturating_mul(2) {
        return times.into_iter().zip(snapshot.values.iter().copied()).collect();
    }

    let mut points = Vec::with_capacity(buckets * 2);
    for b in 0..buckets {
        let start = b * n / buckets;
        let end = ((b + 1) * n / buckets).max(start + 1).min(n);
        let (mut lo, mut hi) = (start, start);
        for i in start..end {
            if snapshot.values[i] < snapshot.values[lo] {
                lo = i;
            }
            if snapshot.values[i] > snapshot.values[hi] {
                hi = i;
            }
        }
        let (first, second) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        points.push((times[first], snapshot.values[first]));
        if second != first {
            points.push((times[second], snapshot.values[second]));
        }
    }
    points
}

/// Frame around the trace. The header carries the buffer fill, the footer
/// the producer's state once it has stopped.
fn signal_card(
    ui: &mut egui::Ui,
    snapshot: &Snapshot,
    capacity: usize,
    exit: Option<&ProducerExit>,
    draw: impl FnOnce(&mut egui::Ui),
) {
    egui::Frame::none()
        .fill(Color32::from_rgb(20, 22, 20))
        .stroke(Stroke::new(1.0, GRID))
        .rounding(Rounding::same(6.0))
        .inner_margin(egui::Margin::same(10.0))
        .show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.colored_label(ACCENT, "ECG");
                ui.separator();
                let fill = snapshot.len() as f32 / capacity.max(1) as f32;
                ui.add(
                    egui::ProgressBar::new(fill)
                        .desired_width(120.0)
                        .text(format!("{} / {capacity}", snapshot.len())),
                );
                ui.label(format!("{:.1} s", snapshot.span_seconds()));
            });
            ui.add_space(4.0);
            draw(ui);
            if let Some((color, text)) = status_line(exit) {
                ui.add_space(4.0);
                ui.colored_label(color, text);
            }
        });
}

/// Producer state shown under the trace, if it is no longer running.
fn status_line(exit: Option<&ProducerExit>) -> Option<(Color32, String)> {
    match exit? {
        ProducerExit::DeviceError(message) => {
            Some((Color32::RED, format!("Device: {message} (buffer frozen)")))
        }
        ProducerExit::Panicked => Some((Color32::RED, "Producer panicked (buffer frozen)".into())),
        other => Some((Color32::GRAY, format!("Producer {other}"))),
    }
}

fn apply_monitor_theme(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();
    style.visuals = egui::Visuals::dark();
    style.visuals.override_text_color = Some(Color32::from_rgb(235, 235, 235));
    style.visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(18, 18, 18);
    style.visuals.selection.bg_fill = ACCENT;
    style.visuals.window_fill = Color32::from_rgb(14, 14, 14);
    ctx.set_style(style);
}
