//! Main application for the video downloader GUI

// eframe/egui for GUI application framework
use eframe::{egui, App, Frame};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use std::{collections::VecDeque, path::PathBuf, sync::Arc, time::Duration};
use tokio::runtime::Runtime;
use egui::{Align2, RichText, Visuals};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ytdl_gui::{
    config::{AppConfig, JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore},
    deps,
    model::{
        default_output_dir, output_dir_for_kind_change, AudioFormat, AudioQuality, DownloadKind,
        DownloadOptions, Notification, SessionState, VideoFormat, VideoQuality,
    },
    process,
    session::{DownloadSession, SessionSink},
};

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Program entry point: initializes logging and runtime, then launches GUI
fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ytdl_gui=info")),
        )
        .init();

    // Create a new Tokio runtime and store it globally
    let rt = RUNTIME.get_or_init(|| Arc::new(Runtime::new().expect("failed to start tokio runtime")));

    let config = AppConfig::from_env();
    info!(downloader = %config.downloader, strategy = %config.strategy, "starting");
    let app = DownloaderApp::new(&config, rt.handle().clone());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Video Downloader")
            .with_inner_size([800.0, 750.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Video Downloader",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(app)
        }),
    )
}

/// What the session writes to: log text, progress bar, pending dialogs
#[derive(Default)]
struct SessionView {
    log: String,
    /// 0.0 to 100.0
    progress: f32,
    dialogs: VecDeque<Notification>,
}

impl SessionSink for SessionView {
    fn clear_log(&mut self) {
        self.log.clear();
    }

    fn append_log(&mut self, text: &str) {
        self.log.push_str(text);
    }

    fn set_progress(&mut self, percent: f32) {
        self.progress = percent.clamp(0.0, 100.0);
    }

    fn notify(&mut self, notification: Notification) {
        self.dialogs.push_back(notification);
    }
}

/// Application state for the GUI
struct DownloaderApp {
    session: DownloadSession,
    view: SessionView,
    /// Input field for the video URL
    url_input: String,
    kind: DownloadKind,
    /// Destination folder, as typed or picked
    output_dir: String,
    video_quality: VideoQuality,
    video_format: VideoFormat,
    audio_format: AudioFormat,
    audio_quality: AudioQuality,
}

impl DownloaderApp {
    fn new(config: &AppConfig, runtime: tokio::runtime::Handle) -> Self {
        let prefs: Box<dyn PreferenceStore> = match JsonPreferenceStore::default_location() {
            Some(store) => {
                debug!(path = %store.path().display(), "using preferences file");
                Box::new(store)
            }
            None => Box::new(MemoryPreferenceStore::default()),
        };
        let output_dir = prefs
            .load()
            .usable_download_path()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_output_dir(DownloadKind::Video));

        let missing = deps::missing_tools(config.required_tools());
        let mut view = SessionView::default();
        if !missing.is_empty() {
            view.append_log(&format!("CRITICAL: Missing dependencies: {}\n", missing.join(", ")));
            view.notify(Notification::Warning(deps::missing_tools_message(&missing)));
        }

        let launcher = process::launcher_for(config.strategy, runtime);
        let session = DownloadSession::new(launcher, prefs, config.downloader.clone())
            .with_missing_tools(missing);

        Self {
            session,
            view,
            url_input: String::new(),
            kind: DownloadKind::Video,
            output_dir: output_dir.display().to_string(),
            video_quality: VideoQuality::Best,
            video_format: VideoFormat::Default,
            audio_format: AudioFormat::Mp3,
            audio_quality: AudioQuality::Best,
        }
    }

    fn start_download(&mut self) {
        let options = DownloadOptions {
            url: self.url_input.clone(),
            kind: self.kind,
            output_dir: PathBuf::from(self.output_dir.trim()),
            video_quality: self.video_quality,
            video_format: self.video_format,
            audio_format: self.audio_format,
            audio_quality: self.audio_quality,
        };
        if let Err(e) = self.session.start_download(options, &mut self.view) {
            debug!("download not started: {}", e);
        }
    }

    fn set_kind(&mut self, kind: DownloadKind) {
        if kind == self.kind {
            return;
        }
        self.kind = kind;
        if let Some(dir) = output_dir_for_kind_change(&PathBuf::from(&self.output_dir), kind) {
            self.output_dir = dir.display().to_string();
        }
    }

    fn browse_folder(&mut self) {
        if let Some(folder) = FileDialog::new()
            .set_directory(&self.output_dir)
            .pick_folder()
        {
            self.session.remember_output_dir(&folder);
            self.output_dir = folder.display().to_string();
        }
    }

    fn video_options(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label(RichText::new("Video Options").strong());
            egui::ComboBox::from_label("Quality")
                .selected_text(self.video_quality.label())
                .show_ui(ui, |ui| {
                    for q in VideoQuality::ALL {
                        ui.selectable_value(&mut self.video_quality, q, q.label());
                    }
                });
            egui::ComboBox::from_label("Format")
                .selected_text(self.video_format.label())
                .show_ui(ui, |ui| {
                    for f in VideoFormat::ALL {
                        ui.selectable_value(&mut self.video_format, f, f.label());
                    }
                });
        });
    }

    fn audio_options(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label(RichText::new("Audio Options").strong());
            egui::ComboBox::from_label("Format")
                .selected_text(self.audio_format.codec())
                .show_ui(ui, |ui| {
                    for f in AudioFormat::ALL {
                        ui.selectable_value(&mut self.audio_format, f, f.codec());
                    }
                });
            egui::ComboBox::from_label("Quality")
                .selected_text(self.audio_quality.label())
                .show_ui(ui, |ui| {
                    for q in AudioQuality::ALL {
                        ui.selectable_value(&mut self.audio_quality, q, q.label());
                    }
                });
        });
    }

    /// Shows the oldest pending notification as a modal-style window
    fn show_dialog(&mut self, ctx: &egui::Context) {
        let Some(notification) = self.view.dialogs.front() else {
            return;
        };
        let title = match notification {
            Notification::Success(_) => "Success",
            Notification::Warning(_) => "Warning",
            Notification::Error(_) => "Error",
        };
        let text = notification.to_string();
        let mut dismissed = false;
        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(text);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.view.dialogs.pop_front();
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // Apply process output before drawing
        self.session.pump(&mut self.view);

        let idle = self.session.state() == SessionState::Idle;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Video/Audio Downloader");
            ui.add_space(10.0);

            ui.horizontal(|ui| {
                ui.label("Video URL:");
                ui.add_enabled(
                    idle,
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text("Enter video URL here...")
                        .desired_width(f32::INFINITY),
                );
            });

            ui.horizontal(|ui| {
                ui.label("Download Type:");
                let mut kind = self.kind;
                ui.radio_value(&mut kind, DownloadKind::Video, "Video");
                ui.radio_value(&mut kind, DownloadKind::Audio, "Audio Only");
                self.set_kind(kind);
            });

            match self.kind {
                DownloadKind::Video => self.video_options(ui),
                DownloadKind::Audio => self.audio_options(ui),
            }

            ui.horizontal(|ui| {
                ui.label("Save to:");
                ui.text_edit_singleline(&mut self.output_dir);
                if ui.button("Browse").clicked() {
                    self.browse_folder();
                }
            });

            ui.add_space(10.0);
            ui.add(egui::ProgressBar::new(self.view.progress / 100.0).show_percentage());

            ui.horizontal(|ui| {
                if ui
                    .add_enabled(self.session.download_enabled(), egui::Button::new("Download"))
                    .clicked()
                {
                    self.start_download();
                }
                if ui
                    .add_enabled(self.session.cancel_enabled(), egui::Button::new("Cancel"))
                    .clicked()
                {
                    self.session.cancel_download(&mut self.view);
                }
            });

            ui.add_space(10.0);
            ui.label(RichText::new("Log Output:").strong());
            egui::ScrollArea::vertical()
                .max_height(150.0)
                .stick_to_bottom(true)
                .auto_shrink([false; 2])
                .show(ui, |ui| {
                    ui.add(
                        egui::TextEdit::multiline(&mut self.view.log.as_str())
                            .font(egui::TextStyle::Monospace)
                            .desired_width(f32::INFINITY),
                    );
                });
        });

        self.show_dialog(ctx);

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
