//! Terminal progress view for a synchronization run
//!
//! Runs on its own OS thread so terminal I/O never blocks the engine. The
//! view reads ledger snapshots from a watch channel and can send back only
//! one thing: an interrupt request.

pub mod app;
pub mod events;
pub mod widgets;

use anyhow::{Context, Result};
use app::App;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

use crate::ledger::LedgerSnapshot;
use crate::shutdown::ShutdownTrigger;

/// How long to wait for a key before redrawing
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Start the progress view on a dedicated thread.
///
/// The thread exits once a finished snapshot has been drawn or the sending
/// side is dropped, restoring the terminal either way.
pub fn spawn_progress_view(
    title: String,
    snapshots: watch::Receiver<Arc<LedgerSnapshot>>,
    trigger: ShutdownTrigger,
) -> io::Result<JoinHandle<Result<()>>> {
    std::thread::Builder::new()
        .name("progress-view".to_string())
        .spawn(move || run_tui(title, snapshots, trigger))
}

fn run_tui(
    title: String,
    snapshots: watch::Receiver<Arc<LedgerSnapshot>>,
    trigger: ShutdownTrigger,
) -> Result<()> {
    // Setup terminal (raw mode)
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(title);
    let result = run_app(&mut terminal, &mut app, snapshots, &trigger);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Main view loop
fn run_app<B>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    mut snapshots: watch::Receiver<Arc<LedgerSnapshot>>,
    trigger: &ShutdownTrigger,
) -> Result<()>
where
    B: ratatui::backend::Backend,
{
    loop {
        let snapshot = Arc::clone(&snapshots.borrow_and_update());
        terminal.draw(|f| app.draw(f, &snapshot))?;

        if snapshot.finished {
            break;
        }
        if snapshots.has_changed().is_err() {
            // Engine is gone without a final snapshot.
            break;
        }

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if let Some(action) = events::key_handler::key_to_action(&key) {
                    if app.handle_action(action, snapshot.items.len()) {
                        trigger.trigger();
                    }
                }
            }
        }
    }

    Ok(())
}
