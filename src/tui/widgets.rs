//! Widgets for the progress view
//!
//! Each widget renders straight from a [`LedgerSnapshot`]; none of them hold
//! state beyond what the caller passes in.

use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame,
};
use std::ops::Range;
use std::time::Duration;

use crate::ledger::{Item, ItemKind, ItemStatus, LedgerSnapshot, Origin};

/// Color scheme for the TUI
pub struct ColorScheme {
    pub primary: Color,
    pub secondary: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub text: Color,
    pub muted: Color,
    pub border: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            primary: Color::Blue,
            secondary: Color::Cyan,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Magenta,
            text: Color::White,
            muted: Color::DarkGray,
            border: Color::Gray,
        }
    }
}

impl ColorScheme {
    pub fn status(&self, status: ItemStatus) -> (&'static str, Color) {
        match status {
            ItemStatus::Pending => ("·", self.muted),
            ItemStatus::InProgress => ("▶", self.info),
            ItemStatus::Completed => ("✓", self.success),
            ItemStatus::AlreadyExists => ("=", self.secondary),
            ItemStatus::Failed => ("✗", self.error),
        }
    }
}

/// Overall progress gauge with the current operation as its title
pub struct ProgressHeader<'a> {
    snapshot: &'a LedgerSnapshot,
    title: &'a str,
    elapsed: Duration,
    colors: &'a ColorScheme,
}

impl<'a> ProgressHeader<'a> {
    pub fn new(
        snapshot: &'a LedgerSnapshot,
        title: &'a str,
        elapsed: Duration,
        colors: &'a ColorScheme,
    ) -> Self {
        Self {
            snapshot,
            title,
            elapsed,
            colors,
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let summary = &self.snapshot.summary;
        let total = summary.local_total();
        let done = summary.local_done();
        let ratio = if total > 0 {
            done as f64 / total as f64
        } else {
            1.0
        };

        let gauge_color = if summary.has_failures() {
            self.colors.warning
        } else {
            self.colors.success
        };

        let current = self
            .snapshot
            .current
            .and_then(|id| self.snapshot.items.get(id))
            .map(|item| format!(" | {}", item.path.display()))
            .unwrap_or_default();

        let gauge = Gauge::default()
            .block(
                Block::default()
                    .title(format!("{}{}", self.title, current))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.colors.border)),
            )
            .gauge_style(Style::default().fg(gauge_color))
            .ratio(ratio.clamp(0.0, 1.0))
            .label(format!(
                "{}/{} items ({:.1}%) {}s",
                done,
                total,
                ratio * 100.0,
                self.elapsed.as_secs()
            ));

        frame.render_widget(gauge, area);
    }
}

/// Scrollable list of items with their status
pub struct ItemList<'a> {
    items: &'a [Item],
    current: Option<usize>,
    visible: Range<usize>,
    follow: bool,
    colors: &'a ColorScheme,
}

impl<'a> ItemList<'a> {
    pub fn new(
        snapshot: &'a LedgerSnapshot,
        visible: Range<usize>,
        follow: bool,
        colors: &'a ColorScheme,
    ) -> Self {
        Self {
            items: &snapshot.items,
            current: snapshot.current,
            visible,
            follow,
            colors,
        }
    }

    fn line(&self, index: usize, item: &'a Item) -> ListItem<'a> {
        let (icon, color) = self.colors.status(item.status);
        let mut spans = vec![Span::styled(
            format!("{} ", icon),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )];

        if item.origin == Origin::RemoteOnly {
            spans.push(Span::styled(
                "(remote) ",
                Style::default().fg(self.colors.muted),
            ));
        }

        let mut path_style = Style::default().fg(self.colors.text);
        if Some(index) == self.current {
            path_style = path_style.add_modifier(Modifier::BOLD);
        }
        let suffix = if item.kind == ItemKind::Folder { "/" } else { "" };
        spans.push(Span::styled(
            format!("{}{}", item.path.display(), suffix),
            path_style,
        ));

        if let Some(error) = &item.last_error {
            let first = error.lines().next().unwrap_or_default();
            spans.push(Span::styled(
                format!("  {}", first),
                Style::default().fg(color),
            ));
        }

        ListItem::new(Line::from(spans))
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let start = self.visible.start.min(self.items.len());
        let end = self.visible.end.min(self.items.len());

        let lines: Vec<ListItem> = self.items[start..end]
            .iter()
            .enumerate()
            .map(|(offset, item)| self.line(start + offset, item))
            .collect();

        let follow = if self.follow { " [follow]" } else { "" };
        let list = List::new(lines).block(
            Block::default()
                .title(format!(
                    "Items ({}-{} of {}){}",
                    if end > start { start + 1 } else { 0 },
                    end,
                    self.items.len(),
                    follow
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.colors.border)),
        );

        frame.render_widget(list, area);
    }
}

/// Totals by kind and status, plus key hints
pub struct SummaryFooter<'a> {
    snapshot: &'a LedgerSnapshot,
    interrupting: bool,
    colors: &'a ColorScheme,
}

impl<'a> SummaryFooter<'a> {
    pub fn new(snapshot: &'a LedgerSnapshot, interrupting: bool, colors: &'a ColorScheme) -> Self {
        Self {
            snapshot,
            interrupting,
            colors,
        }
    }

    fn kind_line(&self, label: &'static str, kind: ItemKind) -> Line<'a> {
        let summary = &self.snapshot.summary;
        let mut spans = vec![Span::styled(
            format!("{:<8}", label),
            Style::default()
                .fg(self.colors.primary)
                .add_modifier(Modifier::BOLD),
        )];
        for status in ItemStatus::ALL {
            let (icon, color) = self.colors.status(status);
            spans.push(Span::styled(
                format!(
                    "{} {} {}   ",
                    icon,
                    summary.count(kind, Origin::Local, status),
                    status
                ),
                Style::default().fg(color),
            ));
        }
        Line::from(spans)
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let summary = &self.snapshot.summary;
        let hint = if self.interrupting {
            Span::styled(
                "Interrupting, waiting for the current command to stop...",
                Style::default().fg(self.colors.warning),
            )
        } else {
            Span::styled(
                "↑/↓ PgUp/PgDn Home/End scroll  f follow  q/Ctrl+C interrupt",
                Style::default().fg(self.colors.muted),
            )
        };

        let text = Text::from(vec![
            self.kind_line("Folders", ItemKind::Folder),
            self.kind_line("Files", ItemKind::File),
            Line::from(vec![
                Span::styled(
                    format!("Remote only: {}   ", summary.remote_only()),
                    Style::default().fg(self.colors.secondary),
                ),
                Span::styled(
                    format!("Failed operations: {}", summary.failed_operations),
                    Style::default().fg(if summary.failed_operations > 0 {
                        self.colors.error
                    } else {
                        self.colors.text
                    }),
                ),
            ]),
            Line::from(hint),
        ]);

        let paragraph = Paragraph::new(text)
            .block(
                Block::default()
                    .title("Summary")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.colors.border)),
            )
            .alignment(Alignment::Left);

        frame.render_widget(paragraph, area);
    }
}
