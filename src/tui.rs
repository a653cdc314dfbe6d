use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use std::io::{stdout, BufRead, Write};

const ACCENT: Color = Color::Rgb(90, 23, 238); // #5a17ee
const FG: Color = Color::Rgb(224, 224, 224);
const MUTED: Color = Color::Rgb(102, 102, 102);

const CONFIRM_TRIES: usize = 5;

/// Full-screen terminal, restored on drop.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
}

impl Tui {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout());
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    pub fn restore(&mut self) -> Result<()> {
        disable_raw_mode()?;
        stdout().execute(LeaveAlternateScreen)?;
        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        self.restore().ok();
    }
}

/// Cursor over a list of choices.
#[derive(Debug, Clone)]
pub struct Picker {
    pub label: String,
    pub items: Vec<String>,
    state: ListState,
}

/// What a key press did to the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerOutcome {
    Pending,
    Selected(String),
    Cancelled,
}

impl Picker {
    pub fn new(label: impl Into<String>, items: Vec<String>) -> Self {
        let mut state = ListState::default();
        if !items.is_empty() {
            state.select(Some(0));
        }
        Self {
            label: label.into(),
            items,
            state,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.state.selected().and_then(|i| self.items.get(i)).map(String::as_str)
    }

    fn move_by(&mut self, delta: isize) {
        if self.items.is_empty() {
            return;
        }
        let len = self.items.len() as isize;
        let current = self.state.selected().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len);
        self.state.select(Some(next as usize));
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> PickerOutcome {
        if key.kind != KeyEventKind::Press {
            return PickerOutcome::Pending;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.move_by(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_by(1),
            KeyCode::Enter => {
                return match self.selected() {
                    Some(item) => PickerOutcome::Selected(item.to_string()),
                    None => PickerOutcome::Cancelled,
                }
            }
            KeyCode::Esc | KeyCode::Char('q') => return PickerOutcome::Cancelled,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return PickerOutcome::Cancelled
            }
            _ => {}
        }
        PickerOutcome::Pending
    }
}

fn render(frame: &mut Frame, picker: &mut Picker) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], &picker.label);

    let items: Vec<ListItem> = picker
        .items
        .iter()
        .map(|i| ListItem::new(Line::from(Span::styled(i.clone(), Style::default().fg(FG)))))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::NONE))
        .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
        .highlight_symbol("\u{25b8} ");
    frame.render_stateful_widget(list, chunks[1], &mut picker.state);

    let help = Paragraph::new(Line::from(Span::styled(
        " \u{2191}\u{2193} to move, Enter to select, Esc to cancel",
        Style::default().fg(MUTED),
    )));
    frame.render_widget(help, chunks[2]);
}

fn render_header(frame: &mut Frame, area: Rect, label: &str) {
    let header = Paragraph::new(Line::from(Span::styled(
        format!(" {}", label),
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
    )));
    frame.render_widget(header, area);
}

/// Let the user pick one of `items`; `None` when cancelled.
pub fn select(label: &str, items: Vec<String>) -> Result<Option<String>> {
    let mut picker = Picker::new(label, items);
    let mut tui = Tui::new()?;

    loop {
        tui.terminal.draw(|frame| render(frame, &mut picker))?;
        if let Event::Key(key) = event::read()? {
            match picker.handle_key(key) {
                PickerOutcome::Pending => {}
                PickerOutcome::Selected(item) => return Ok(Some(item)),
                PickerOutcome::Cancelled => return Ok(None),
            }
        }
    }
}

/// Read one line from the terminal after showing `prompt`.
pub fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Read a secret without echoing it.
pub fn read_secret(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    stdout().flush()?;

    enable_raw_mode()?;
    let result = read_secret_keys();
    disable_raw_mode()?;
    println!();
    result
}

fn read_secret_keys() -> Result<String> {
    let mut secret = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => return Ok(secret),
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    anyhow::bail!("interrupted")
                }
                KeyCode::Char(c) => secret.push(c),
                _ => {}
            }
        }
    }
}

/// First line of `input`, for `--*-stdin` flags.
pub fn read_stdin_secret(input: impl BufRead) -> Result<String> {
    let line = input
        .lines()
        .next()
        .transpose()?
        .unwrap_or_default();
    let secret = line.trim().to_string();
    if secret.is_empty() {
        anyhow::bail!("nothing was read from stdin");
    }
    Ok(secret)
}

/// Ask a yes/no question, re-asking up to five times on other answers.
pub fn confirm(question: &str, mut input: impl BufRead, mut out: impl Write) -> Result<bool> {
    for _ in 0..CONFIRM_TRIES {
        write!(out, "{} [yes/no]: ", question)?;
        out.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "yes" | "y" => return Ok(true),
            "no" | "n" => return Ok(false),
            _ => writeln!(out, "You have to put 'yes' or 'no'")?,
        }
    }
    Ok(false)
}
