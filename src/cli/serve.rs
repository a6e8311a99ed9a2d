//! `hotview serve` - the development host.
//!
//! Accepts a device connection, reads edited paths from stdin (one per line,
//! as emitted by an editor hook or file watcher), synthesizes the affected
//! views and ships every rebuilt unit to the device as an `eval-request`.
//! Results coming back are reported through the status display.

use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{
    channel::{DeviceChannel, EvalOutcome, EvalRequest, EvalResult, WireMessage, server::HostListener},
    config::HotConfig,
    core::register_shutdown,
    debug, log,
    logger::{status_error, status_info, status_success, status_unchanged},
    synth::{ClassSynthesizer, MarkupDocument, SourceDocument, SynthOutcome},
};

/// Run the host until stdin closes or Ctrl+C.
pub fn serve(config: &HotConfig) -> Result<()> {
    let session = Arc::new(HostSession::new(ClassSynthesizer::from_config(config)?));

    let listener = HostListener::bind(config.serve.interface, config.serve.port)?
        .with_handshake_timeout(config.serve.handshake_timeout());
    log!("serve"; "waiting for a device on {}:{}", config.serve.interface, listener.port());

    let attach = Arc::clone(&session);
    let _acceptor = listener.spawn_acceptor(Arc::new(report_result), move |channel| {
        attach.attach(channel);
    })?;

    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    register_shutdown(shutdown_tx);
    let edits = spawn_edit_reader();

    loop {
        channel::select! {
            recv(edits) -> path => match path {
                Ok(path) => {
                    if let Err(e) = session.on_edit(&path) {
                        status_error(&format!("synthesis failed: {}", path.display()), &format!("{e:#}"));
                    }
                }
                Err(_) => {
                    debug!("serve"; "edit stream closed");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    session.detach();
    Ok(())
}

/// Host-side state shared by the edit loop and the acceptor.
pub struct HostSession {
    synthesizer: ClassSynthesizer,
    device: Mutex<Option<DeviceChannel>>,
    /// Latest unsent request per view, flushed when a device attaches
    unsent: Mutex<FxHashMap<String, EvalRequest>>,
    next_id: AtomicU64,
}

impl HostSession {
    pub fn new(synthesizer: ClassSynthesizer) -> Self {
        Self {
            synthesizer,
            device: Mutex::new(None),
            unsent: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the current device connection and send what it missed.
    pub fn attach(&self, channel: DeviceChannel) {
        if let Some(previous) = self.device.lock().replace(channel) {
            previous.close();
        }
        status_success("device attached");

        let unsent: Vec<_> = self.unsent.lock().drain().map(|(_, r)| r).collect();
        for request in &unsent {
            self.ship(request);
        }
    }

    pub fn detach(&self) {
        if let Some(channel) = self.device.lock().take() {
            channel.close();
        }
    }

    /// Route one edited path through the synthesizer.
    ///
    /// Returns the request built for a rebuilt view, whether or not a device
    /// was attached to receive it.
    pub fn on_edit(&self, path: &Path) -> Result<Option<EvalRequest>> {
        let path = std::path::absolute(path)
            .with_context(|| format!("invalid path {}", path.display()))?;

        let outcome = if self.synthesizer.is_markup(&path) {
            let doc = MarkupDocument::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            self.synthesizer.on_markup_updated(&doc)?
        } else if self.synthesizer.is_source(&path) {
            let doc = SourceDocument::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            self.synthesizer.on_source_updated(&doc)?
        } else {
            debug!("serve"; "ignoring {}", path.display());
            return Ok(None);
        };

        match outcome {
            SynthOutcome::Rebuilt { full_name, version } => {
                let Some(unit) = self.synthesizer.take_rebuild(&full_name) else {
                    return Ok(None);
                };
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                let request = EvalRequest::new(id, unit.full_name, unit.source);
                debug!("serve"; "rebuilt {} as {} (v{})", full_name, unit.type_name, version);
                self.ship(&request);
                Ok(Some(request))
            }
            SynthOutcome::Unchanged { full_name } => {
                status_unchanged(&full_name);
                Ok(None)
            }
            SynthOutcome::Pending { full_name } => {
                status_info(&format!("waiting for behind-code: {full_name}"), "");
                Ok(None)
            }
        }
    }

    fn ship(&self, request: &EvalRequest) {
        let device = self.device.lock().clone();
        let Some(device) = device.filter(|d| d.is_open()) else {
            status_info(
                &format!("no device attached: {}", request.full_name),
                "the view is sent once a device connects",
            );
            self.keep_unsent(request);
            return;
        };

        match device.send(&WireMessage::from(request)) {
            Ok(()) => log!("serve"; "sent {} ({})", request.full_name, request.id),
            Err(e) => {
                status_error(&format!("failed to send {}", request.full_name), &e.to_string());
                self.keep_unsent(request);
            }
        }
    }

    fn keep_unsent(&self, request: &EvalRequest) {
        self.unsent
            .lock()
            .insert(request.full_name.clone(), request.clone());
    }
}

/// Report one message from the device.
fn report_result(message: WireMessage) {
    let result = match EvalResult::try_from(message) {
        Ok(result) => result,
        Err(e) => {
            log!("serve"; "dropping message: {}", e);
            return;
        }
    };

    match &result.outcome {
        EvalOutcome::Rendered(_) => {
            status_success(&format!("rendered: {} ({})", result.full_name, result.id));
        }
        EvalOutcome::NoResult { description } => {
            status_info(&format!("nothing to show: {}", result.full_name), description);
        }
        EvalOutcome::Failed { error } => {
            status_error(&format!("evaluation failed: {}", result.full_name), error);
        }
    }
}

/// Forward non-empty stdin lines as paths until stdin closes.
fn spawn_edit_reader() -> Receiver<PathBuf> {
    let (tx, rx) = channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if tx.send(PathBuf::from(line)).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageKind;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tempfile::TempDir;

    const MARKUP: &str = r#"<ContentPage xmlns:x="http://schemas.microsoft.com/winfx/2009/xaml"
             x:Class="Demo.CardView">
    <Label Text="Card" />
</ContentPage>
"#;

    const BEHAVIOR: &str = r#"namespace Demo
{
    public partial class CardView : ContentView
    {
        public CardView() { InitializeComponent(); }
    }
}
"#;

    const GENERATED: &str = r#"namespace Demo
{
    partial class CardView
    {
        private void InitializeComponent()
        {
            global::Xamarin.Forms.Xaml.Extensions.LoadFromXaml(this, typeof(CardView));
        }
    }
}
"#;

    fn project() -> (TempDir, HostSession) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("App.csproj"), "<Project />").unwrap();
        std::fs::write(root.join("CardView.xaml"), MARKUP).unwrap();
        std::fs::write(root.join("CardView.xaml.cs"), BEHAVIOR).unwrap();
        std::fs::write(root.join("CardView.xaml.g.cs"), GENERATED).unwrap();

        let mut config = HotConfig::default();
        config.set_root(root);
        let session = HostSession::new(ClassSynthesizer::from_config(&config).unwrap());
        (dir, session)
    }

    #[test]
    fn test_edit_sequence() {
        let (dir, session) = project();

        let markup = session.on_edit(&dir.path().join("CardView.xaml")).unwrap();
        assert!(markup.is_none());

        let request = session
            .on_edit(&dir.path().join("CardView.xaml.cs"))
            .unwrap()
            .unwrap();
        assert_eq!(request.id, "1");
        assert_eq!(request.full_name, "Demo.CardView");
        assert!(request.source.contains("class CardView1"));

        // Same content again: nothing to ship
        assert!(session.on_edit(&dir.path().join("CardView.xaml.cs")).unwrap().is_none());
    }

    #[test]
    fn test_ignores_unrelated_files() {
        let (dir, session) = project();
        std::fs::write(dir.path().join("notes.txt"), "todo").unwrap();
        assert!(session.on_edit(&dir.path().join("notes.txt")).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let (dir, session) = project();
        assert!(session.on_edit(&dir.path().join("Gone.xaml")).is_err());
    }

    fn connect(session: &HostSession) -> (DeviceChannel, Receiver<WireMessage>) {
        let listener = HostListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let port = listener.port();
        let host = std::thread::spawn(move || listener.accept(|_| {}).unwrap());

        let (tx, rx) = channel::unbounded();
        let device = DeviceChannel::new(move |m| {
            let _ = tx.send(m);
        });
        device.connect("127.0.0.1", port).unwrap();
        session.attach(host.join().unwrap());
        (device, rx)
    }

    #[test]
    fn test_unsent_unit_flushed_on_attach() {
        let (dir, session) = project();
        session.on_edit(&dir.path().join("CardView.xaml")).unwrap();
        session.on_edit(&dir.path().join("CardView.xaml.cs")).unwrap();

        let (device, rx) = connect(&session);
        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.id, "1");
        assert!(session.unsent.lock().is_empty());

        session.detach();
        device.close();
    }

    #[test]
    fn test_rebuilt_unit_reaches_device() {
        let (dir, session) = project();
        let (device, rx) = connect(&session);

        session.on_edit(&dir.path().join("CardView.xaml")).unwrap();
        session.on_edit(&dir.path().join("CardView.xaml.cs")).unwrap();

        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(message.kind, MessageKind::EvalRequest);
        assert_eq!(message.full_name, "Demo.CardView");
        assert!(message.source.unwrap().contains("CardView1"));

        session.detach();
        device.close();
    }
}
