use crate::{
    app::{App, COLUMNS},
    cell::CellStyle,
};
use price_board::{
    ConnectionStatus, FlashKind, PriceCompare, SubscriptionState, format::display_value,
};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table},
};

const NEUTRAL: Color = Color::Rgb(200, 200, 220);
const BACKGROUND: Color = Color::Rgb(15, 15, 25);

/// Rows taken by the table's borders and header.
pub const TABLE_CHROME: u16 = 3;

/// Draw the board and return the number of data rows that fit the table.
pub fn ui(f: &mut Frame, app: &App) -> usize {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_status_bar(f, chunks[0], app);
    render_board(f, chunks[1], app);
    render_help(f, chunks[2]);

    usize::from(chunks[1].height.saturating_sub(TABLE_CHROME))
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (status_symbol, status_text, status_color) = match app.status() {
        ConnectionStatus::Connected => ("●", "CONNECTED", Color::Rgb(0, 255, 127)),
        ConnectionStatus::Reconnecting => ("◐", "RECONNECTING", Color::Rgb(255, 215, 0)),
        ConnectionStatus::Disconnected => ("○", "DISCONNECTED", Color::Rgb(255, 69, 58)),
    };

    let status = Span::styled(
        format!(" {} {} ", status_symbol, status_text),
        Style::default()
            .fg(status_color)
            .add_modifier(Modifier::BOLD),
    );

    let mut spans = vec![status, Span::raw(" ")];
    for (index, board) in app.boards().iter().enumerate() {
        let style = if index == app.selected() {
            Style::default()
                .fg(Color::Rgb(18, 18, 28))
                .bg(Color::Rgb(100, 149, 237))
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Rgb(100, 149, 237))
        };
        spans.push(Span::styled(format!(" {} {} ", index + 1, board.id), style));
    }

    let state = match app.subscription_state() {
        SubscriptionState::Idle => "idle".to_string(),
        SubscriptionState::Subscribing { .. } => "loading…".to_string(),
        SubscriptionState::Active { .. } => format!(
            "rows {}-{} of {}",
            (app.offset() + 1).min(app.total_rows()),
            app.offset() + app.mounted().len(),
            app.total_rows()
        ),
    };
    spans.push(Span::styled(
        format!("  {} ", state),
        Style::default().fg(Color::Rgb(128, 128, 150)),
    ));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(Color::Rgb(138, 43, 226)))
        .style(Style::default().bg(Color::Rgb(18, 18, 28)));

    let paragraph = Paragraph::new(Line::from(spans))
        .block(block)
        .alignment(Alignment::Left);

    f.render_widget(paragraph, area);
}

fn render_board(f: &mut Frame, area: Rect, app: &App) {
    let header = Row::new(
        std::iter::once("Symbol")
            .chain(COLUMNS.iter().map(|(_, title)| *title))
            .map(|title| Cell::from(title).style(Style::default().add_modifier(Modifier::BOLD))),
    )
    .style(Style::default().fg(Color::Rgb(255, 215, 0)));

    let store = app.services().store.read();
    let rows = app.visible_rows().iter().map(|symbol| {
        let ticker = symbol.split(':').next().unwrap_or(symbol.as_str()).to_string();
        let mut cells = vec![Cell::from(ticker).style(Style::default().fg(Color::White))];

        cells.extend(COLUMNS.iter().map(|&(field, _)| {
            let text = store
                .get(symbol)
                .map(|snapshot| display_value(snapshot, field))
                .unwrap_or_default();
            let style = app
                .mounted()
                .cell(symbol, field)
                .map(|cell| cell_style(cell.style()))
                .unwrap_or_else(|| Style::default().fg(NEUTRAL));
            Cell::from(text).style(style)
        }));

        Row::new(cells)
    });

    let widths = std::iter::once(Constraint::Length(6))
        .chain(COLUMNS.iter().map(|_| Constraint::Min(6)))
        .collect::<Vec<_>>();

    let title = app
        .boards()
        .get(app.selected())
        .map(|board| format!(" {} ", board))
        .unwrap_or_default();

    let block = Block::default()
        .title(Span::styled(
            title,
            Style::default()
                .fg(Color::Rgb(255, 215, 0))
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(100, 149, 237)))
        .style(Style::default().bg(BACKGROUND));

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .column_spacing(1);

    f.render_widget(table, area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let help = Span::styled(
        " [←/→] Board  [1-9] Jump  [↑/↓/PgUp/PgDn] Scroll  [R] Resubscribe  [Q] Quit ",
        Style::default().fg(Color::Rgb(128, 128, 128)),
    );
    f.render_widget(Paragraph::new(Line::from(help)), area);
}

fn compare_color(compare: PriceCompare) -> Color {
    match compare {
        PriceCompare::Up => Color::Rgb(0, 255, 127),
        PriceCompare::Down => Color::Rgb(255, 69, 58),
        PriceCompare::Ceiling => Color::Rgb(186, 85, 211),
        PriceCompare::Floor => Color::Rgb(0, 191, 255),
        PriceCompare::Reference => Color::Rgb(255, 215, 0),
        PriceCompare::Unchanged => NEUTRAL,
    }
}

fn flash_color(kind: FlashKind) -> Color {
    match kind {
        FlashKind::Up => compare_color(PriceCompare::Up),
        FlashKind::Down => compare_color(PriceCompare::Down),
        FlashKind::Ceiling => compare_color(PriceCompare::Ceiling),
        FlashKind::Floor => compare_color(PriceCompare::Floor),
        FlashKind::Reference => compare_color(PriceCompare::Reference),
    }
}

fn cell_style(style: CellStyle) -> Style {
    match style.flash {
        Some(kind) => Style::default()
            .fg(Color::Rgb(18, 18, 28))
            .bg(flash_color(kind))
            .add_modifier(Modifier::BOLD),
        None => Style::default().fg(style.color.map(compare_color).unwrap_or(NEUTRAL)),
    }
}
