mod app;
mod cell;
mod ui;

use app::App;
use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        Event, KeyCode, KeyEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use price_board::{PipelineConfig, PricePipeline};
use ratatui::{Terminal, backend::CrosstermBackend};
use rustls::crypto::ring::default_provider;
use std::{error::Error, fs::File, io, sync::Mutex, time::Duration};
use tracing::info;

/// Log file from PRICE_BOARD_LOG env var (default: price-board-tui.log). The terminal belongs to
/// the board, so logs never go to stdout.
fn init_logging() -> io::Result<()> {
    let path =
        std::env::var("PRICE_BOARD_LOG").unwrap_or_else(|_| "price-board-tui.log".to_string());
    let file = File::create(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging()?;

    let config = PipelineConfig::from_env()?;
    let boards = config.boards.clone();
    let pipeline = PricePipeline::spawn(config)?;
    info!(boards = boards.len(), "price board started");

    // Setup panic hook to restore terminal on crash
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(
            io::stdout(),
            LeaveAlternateScreen,
            DisableMouseCapture,
            DisableFocusChange
        );
        original_hook(panic_info);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(pipeline, boards);
    app.select(0);

    let res = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableFocusChange
    )?;
    terminal.show_cursor()?;

    app.dispose();
    res?;

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    let frame_rate = Duration::from_millis(16);

    while !app.should_quit {
        app.refresh();

        let mut viewport = 0;
        terminal.draw(|f| viewport = ui::ui(f, app))?;
        app.set_viewport(viewport);

        if event::poll(frame_rate)? {
            handle_event(app, event::read()?);
        }
    }

    Ok(())
}

fn handle_event(app: &mut App, event: Event) {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
            KeyCode::Right | KeyCode::Tab => app.next_board(),
            KeyCode::Left | KeyCode::BackTab => app.previous_board(),
            KeyCode::Down | KeyCode::Char('j') => app.scroll(1),
            KeyCode::Up | KeyCode::Char('k') => app.scroll(-1),
            KeyCode::PageDown => app.page(1),
            KeyCode::PageUp => app.page(-1),
            KeyCode::Char('r') => app.resubscribe(),
            KeyCode::Char(digit @ '1'..='9') => {
                if let Some(index) = digit.to_digit(10) {
                    app.select(index as usize - 1);
                }
            }
            _ => {}
        },
        Event::FocusLost => app.on_focus_lost(),
        Event::FocusGained => app.on_focus_gained(),
        _ => {}
    }
}
