use crate::client::ChatClient;
use crate::protocol::ChatEvent;
use crate::transcript::{Message, MessageId, Sender, Transcript};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;

const INPUT_HEIGHT: u16 = 5;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug)]
enum UiEvent {
    Stream { id: MessageId, event: ChatEvent },
    StreamClosed { id: MessageId },
}

/// Multi-line input box state. Enter submits, Shift+Enter breaks the line.
struct InputBuffer {
    text: String,
    // Char offset, not bytes; the buffer is small enough that re-walking it
    // on every edit is fine.
    cursor: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            text: String::new(),
            cursor: 0,
        }
    }

    fn byte_offset(&self) -> usize {
        self.text
            .char_indices()
            .nth(self.cursor)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len())
    }

    fn insert(&mut self, c: char) {
        let at = self.byte_offset();
        self.text.insert(at, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_offset();
        self.text.remove(at);
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        if self.cursor < self.text.chars().count() {
            self.cursor += 1;
        }
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        self.cursor = 0;
        text
    }

    /// Cursor position as (column, row) within the rendered text.
    fn cursor_position(&self) -> (u16, u16) {
        let before: String = self.text.chars().take(self.cursor).collect();
        let row = before.matches('\n').count();
        let col = before
            .rsplit('\n')
            .next()
            .map(|line| line.chars().count())
            .unwrap_or(0);
        (col as u16, row as u16)
    }

    fn render(&self) -> Text<'static> {
        if self.text.is_empty() {
            return Text::from(Span::styled(
                "Ask the docs anything...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.text
                .split('\n')
                .map(|line| Line::from(line.to_string()))
                .collect::<Vec<_>>(),
        )
    }
}

fn message_lines(message: &Message) -> Vec<Line<'static>> {
    let (header, color) = match message.sender {
        Sender::User => ("You:", Color::Blue),
        Sender::Assistant => ("Assistant:", Color::Yellow),
    };
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);

    let mut lines = vec![Line::from(Span::styled(header, header_style))];
    for line in message.text.lines() {
        lines.push(Line::from(Span::styled(format!("  {line}"), body_style)));
    }

    if message.is_loading {
        lines.push(Line::from(Span::styled(
            "  ...",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    let source_style = Style::default()
        .fg(Color::DarkGray)
        .add_modifier(Modifier::ITALIC);
    for source in &message.sources {
        lines.push(Line::from(Span::styled(
            format!("  [{}] {}", source.origin, source.excerpt),
            source_style,
        )));
    }

    lines.push(Line::from(""));
    lines
}

/// Height of `lines` once wrapped to `width` columns, so the transcript can
/// stay pinned to the bottom.
fn wrapped_height(lines: &[Line<'_>], width: u16) -> usize {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|line| {
            let len = line.width().max(1);
            len.div_ceil(width)
        })
        .sum()
}

pub struct App {
    transcript: Transcript,
    input: InputBuffer,
    client: ChatClient,
    events_tx: mpsc::Sender<UiEvent>,
    events_rx: mpsc::Receiver<UiEvent>,
    should_quit: bool,
}

impl App {
    pub fn new(client: ChatClient) -> Self {
        let (events_tx, events_rx) = mpsc::channel(100);
        Self {
            transcript: Transcript::new(),
            input: InputBuffer::new(),
            client,
            events_tx,
            events_rx,
            should_quit: false,
        }
    }

    fn draw(&self, f: &mut Frame) {
        let [transcript_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        self.draw_transcript(f, transcript_area);
        self.draw_input(f, input_area);
    }

    fn draw_transcript(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" ragline — {} ", self.client.base_url()))
            .border_style(Style::default().fg(Color::DarkGray));
        let inner = block.inner(area);

        let lines: Vec<Line<'static>> = self
            .transcript
            .messages()
            .iter()
            .flat_map(message_lines)
            .collect();

        let total = wrapped_height(&lines, inner.width);
        let scroll = total.saturating_sub(inner.height as usize) as u16;

        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        f.render_widget(paragraph, area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let title = if self.transcript.is_in_flight() {
            " Input (Esc to quit) [waiting for answer...] "
        } else {
            " Input (Enter to send, Shift+Enter for newline, Esc to quit) "
        };

        let paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);

        let (col, row) = self.input.cursor_position();
        let x = (area.x + 1 + col).min(area.x + area.width.saturating_sub(2));
        let y = (area.y + 1 + row).min(area.y + area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn submit(&mut self) {
        // The in-flight indicator gates resubmission: one exchange at a time.
        if self.input.is_blank() || self.transcript.is_in_flight() {
            return;
        }

        let query = self.input.take().trim().to_string();
        let id = self.transcript.begin_exchange(&query);
        let mut events = self.client.stream_query(query);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if tx.send(UiEvent::Stream { id, event }).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(UiEvent::StreamClosed { id }).await;
        });
    }

    fn handle_events(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                UiEvent::Stream { id, event } => self.transcript.apply(id, event),
                UiEvent::StreamClosed { id } => self.transcript.finish_exchange(id),
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    self.should_quit = true;
                    return Ok(());
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.insert('\n');
                        } else {
                            self.submit();
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert(c);
                    }
                    KeyCode::Backspace => {
                        self.input.backspace();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

pub fn run_tui(client: ChatClient) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal: TuiTerminal = Terminal::new(backend)?;

    let _guard = TerminalGuard::new();
    let mut app = App::new(client);

    while !app.should_quit {
        terminal.draw(|f| app.draw(f))?;
        app.handle_events()?;
    }

    Ok(())
}
