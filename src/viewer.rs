use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use eframe::egui;
use eframe::NativeOptions;
use log::{error, info, warn};

use crate::backend::ProcessingBackend;
use crate::channel_groups::Group;
use crate::panel::{CoherencePanel, Weighting};
use crate::plot::CoherencePlot;
use crate::presets::{PresetManager, DEFAULT_PRESET_NAME};
use crate::refresh::TickOutcome;

const READY_COLOR: egui::Color32 = egui::Color32::from_rgb(0, 160, 0);
const NOT_READY_COLOR: egui::Color32 = egui::Color32::from_rgb(190, 30, 30);

pub struct CoherenceApp<B: ProcessingBackend> {
    panel: CoherencePanel<B>,
    plot: CoherencePlot,
    presets: Option<PresetManager>,
    preset_name: String,
    refresh_interval: Duration,
    last_refresh: Instant,
    acquiring: bool,
    last_outcome: Option<TickOutcome>,
}

impl<B: ProcessingBackend> CoherenceApp<B> {
    pub fn new(panel: CoherencePanel<B>, presets: Option<PresetManager>, refresh_interval: Duration) -> Self {
        CoherenceApp {
            panel,
            plot: CoherencePlot::new("Magnitude-squared coherence"),
            presets,
            preset_name: String::new(),
            refresh_interval,
            last_refresh: Instant::now(),
            acquiring: false,
            last_outcome: None,
        }
    }

    fn group_column(&mut self, ui: &mut egui::Ui, group: Group, title: &str) {
        let unlocked = !self.panel.is_locked();
        ui.vertical(|ui| {
            ui.label(title);
            let active = self.panel.active_channels().to_vec();
            for channel in active {
                let selected = self.panel.channels().group(group).contains(&channel);
                let label = egui::SelectableLabel::new(selected, (channel + 1).to_string());
                if ui.add_enabled(unlocked, label).clicked() {
                    self.panel.toggle_channel(channel, group);
                }
            }
        });
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        let unlocked = !self.panel.is_locked();
        let status = self.panel.status();

        ui.heading("Coherence");
        ui.horizontal(|ui| {
            if ui.toggle_value(&mut self.acquiring, "Acquire").changed() {
                if self.acquiring {
                    self.panel.on_animation_start();
                } else {
                    self.panel.on_animation_end();
                }
            }
            if ui.button("Update").clicked() {
                self.panel.sync_from_backend();
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            self.group_column(ui, Group::One, "Group 1");
            self.group_column(ui, Group::Two, "Group 2");
        });
        ui.horizontal(|ui| {
            if ui.add_enabled(unlocked, egui::Button::new("Clear Groups")).clicked() {
                self.panel.clear_groups();
            }
            if ui.add_enabled(unlocked, egui::Button::new("Default Groups")).clicked() {
                self.panel.default_groups();
            }
        });

        ui.separator();
        let reset_color = if status.ready { READY_COLOR } else { NOT_READY_COLOR };
        let reset = egui::Button::new("Reset").fill(reset_color);
        if ui.add_enabled(unlocked, reset).clicked() {
            self.panel.reset();
        }
        ui.label(format!(
            "Trials: {}   Artifacts: {}",
            status.trials_processed, status.artifacts_discarded
        ));
        if status.show_artifact_notice {
            ui.colored_label(NOT_READY_COLOR, "UPDATE IF ARTIFACTS");
        }

        ui.separator();
        let weighting = self.panel.weighting();
        ui.horizontal(|ui| {
            let linear = egui::RadioButton::new(weighting == Weighting::Linear, "Linear");
            if ui.add_enabled(unlocked, linear).clicked() {
                self.panel.set_weighting(Weighting::Linear);
            }
            let exponential =
                egui::RadioButton::new(weighting == Weighting::Exponential, "Exponential");
            if ui.add_enabled(unlocked, exponential).clicked() {
                self.panel.set_weighting(Weighting::Exponential);
            }
        });

        egui::Grid::new("coherence_fields").num_columns(2).show(ui, |ui| {
            ui.label("Alpha");
            let edit = egui::TextEdit::singleline(self.panel.alpha_field_mut().text_mut())
                .desired_width(60.0);
            if ui.add_enabled(unlocked, edit).lost_focus() {
                let text = self.panel.alpha_field().text().to_string();
                self.panel.edit_alpha(&text);
            }
            ui.end_row();

            ui.label("Artifact threshold (uV)");
            let edit = egui::TextEdit::singleline(self.panel.artifact_field_mut().text_mut())
                .desired_width(60.0);
            if ui.add(edit).lost_focus() {
                let text = self.panel.artifact_field().text().to_string();
                self.panel.edit_artifact_threshold(&text);
            }
            ui.end_row();

            ui.label("Start (Hz)");
            let edit = egui::TextEdit::singleline(self.panel.freq_start_field_mut().text_mut())
                .desired_width(60.0);
            if ui.add(edit).lost_focus() {
                let text = self.panel.freq_start_field().text().to_string();
                self.panel.edit_freq_start(&text);
            }
            ui.end_row();

            ui.label("End (Hz)");
            let edit = egui::TextEdit::singleline(self.panel.freq_end_field_mut().text_mut())
                .desired_width(60.0);
            if ui.add(edit).lost_focus() {
                let text = self.panel.freq_end_field().text().to_string();
                self.panel.edit_freq_end(&text);
            }
            ui.end_row();
        });

        ui.separator();
        let entries = self.panel.selection_entries();
        let selected_id = self.panel.selection_id();
        let selected_text = self
            .panel
            .combinations()
            .label_for(selected_id)
            .unwrap_or_default();
        let mut picked = None;
        egui::ComboBox::from_id_source("combination_select")
            .selected_text(selected_text)
            .width(200.0)
            .show_ui(ui, |ui| {
                for entry in &entries {
                    if ui.selectable_label(entry.id == selected_id, entry.label.as_str()).clicked() {
                        picked = Some(entry.id);
                    }
                }
            });
        if let Some(id) = picked {
            self.panel.select_combination(id);
        }

        self.preset_controls(ui, unlocked);
    }

    fn preset_controls(&mut self, ui: &mut egui::Ui, unlocked: bool) {
        let Some(presets) = self.presets.as_mut() else {
            return;
        };
        ui.separator();
        ui.label("Presets");
        let names: Vec<String> = presets.names().map(str::to_string).collect();
        let mut chosen = None;
        egui::ComboBox::from_id_source("preset_select")
            .selected_text(self.preset_name.as_str())
            .show_ui(ui, |ui| {
                for name in &names {
                    if ui.selectable_label(*name == self.preset_name, name.as_str()).clicked() {
                        chosen = Some(name.clone());
                    }
                }
            });
        if let Some(name) = chosen {
            if let Some(preset) = presets.get(&name).cloned() {
                if self.panel.apply_preset(&preset) {
                    info!("Applied preset '{}'", name);
                }
            }
            self.preset_name = name;
        }

        ui.horizontal(|ui| {
            ui.add(egui::TextEdit::singleline(&mut self.preset_name).desired_width(120.0));
            let can_save = unlocked && !self.preset_name.trim().is_empty();
            if ui.add_enabled(can_save, egui::Button::new("Save")).clicked() {
                let name = self.preset_name.trim().to_string();
                if let Err(e) = presets.insert(&name, self.panel.preset()) {
                    error!("Failed to save preset '{}': {}", name, e);
                }
            }
            let name = self.preset_name.trim().to_string();
            let can_delete = names.contains(&name) && name != DEFAULT_PRESET_NAME;
            if ui.add_enabled(can_delete, egui::Button::new("Delete")).clicked() {
                match presets.remove(&name) {
                    Ok(_) => {
                        info!("Deleted preset '{}'", name);
                        self.preset_name.clear();
                    }
                    Err(e) => error!("Failed to delete preset '{}': {}", name, e),
                }
            }
        });
    }
}

impl<B: ProcessingBackend> eframe::App for CoherenceApp<B> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.set_visuals(egui::Visuals::dark());

        if self.last_refresh.elapsed() >= self.refresh_interval {
            self.last_refresh = Instant::now();
            let outcome = self.panel.refresh(&mut self.plot);
            if let TickOutcome::ShapeMismatch { .. } = outcome {
                if self.last_outcome != Some(outcome) {
                    warn!("Waiting for a coherence matrix matching the current groups");
                }
            }
            self.last_outcome = Some(outcome);
        }
        ctx.request_repaint_after(self.refresh_interval);

        egui::SidePanel::left("coherence_controls")
            .resizable(false)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.controls(ui));
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot.show(ui);
        });
    }
}

/// Runs the viewer window until it is closed.
pub fn run_viewer<B: ProcessingBackend + 'static>(
    panel: CoherencePanel<B>,
    presets: Option<PresetManager>,
    refresh_interval: Duration,
) -> Result<()> {
    let app = CoherenceApp::new(panel, presets, refresh_interval);

    let native_options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 600.0])
            .with_title("Coherence Viewer"),
        vsync: true,
        ..Default::default()
    };

    info!("Starting GUI...");
    eframe::run_native(
        "Coherence Viewer",
        native_options,
        Box::new(|_cc| Box::new(app)),
    )
    .map_err(|e| anyhow!("GUI error: {}", e))
}
