//! Progress view state
//!
//! The view owns only its scroll position and follow mode. Everything it
//! shows comes from the latest [`LedgerSnapshot`].

use ratatui::{
    layout::{Constraint, Direction, Layout},
    Frame,
};
use std::ops::Range;
use std::time::Instant;

use super::events::ViewAction;
use super::widgets::{ColorScheme, ItemList, ProgressHeader, SummaryFooter};
use crate::ledger::LedgerSnapshot;

/// Rows taken by the header gauge and summary footer
const HEADER_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 6;

pub struct App {
    title: String,
    colors: ColorScheme,
    started: Instant,
    /// First visible item
    offset: usize,
    /// Keep the in-progress item in view
    follow: bool,
    /// Item rows that fit in the list on the last draw
    viewport: usize,
    interrupting: bool,
}

impl App {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            colors: ColorScheme::default(),
            started: Instant::now(),
            offset: 0,
            follow: true,
            viewport: 10,
            interrupting: false,
        }
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Apply a key action; returns true when it asks for an interrupt
    pub fn handle_action(&mut self, action: ViewAction, total: usize) -> bool {
        let page = self.viewport.max(1);
        match action {
            ViewAction::ScrollUp => self.scroll_to(self.offset.saturating_sub(1), total),
            ViewAction::ScrollDown => self.scroll_to(self.offset + 1, total),
            ViewAction::PageUp => self.scroll_to(self.offset.saturating_sub(page), total),
            ViewAction::PageDown => self.scroll_to(self.offset + page, total),
            ViewAction::Home => self.scroll_to(0, total),
            ViewAction::End => {
                self.scroll_to(total, total);
                self.follow = true;
            }
            ViewAction::ToggleFollow => self.follow = !self.follow,
            ViewAction::Interrupt => {
                self.interrupting = true;
                return true;
            }
        }
        false
    }

    /// Manual scrolling stops following the current item
    fn scroll_to(&mut self, offset: usize, total: usize) {
        self.follow = false;
        self.offset = offset.min(max_offset(total, self.viewport));
    }

    /// Rows of `snapshot.items` to show in a list `height` rows tall
    pub fn visible_range(&mut self, snapshot: &LedgerSnapshot, height: usize) -> Range<usize> {
        self.viewport = height;
        let total = snapshot.items.len();
        if self.follow {
            self.offset = match snapshot.current {
                Some(current) => current.saturating_sub(height / 2),
                // Between commands, or finished: stay put unless new items pushed us off
                None => self.offset,
            };
        }
        self.offset = self.offset.min(max_offset(total, height));
        self.offset..(self.offset + height).min(total)
    }

    pub fn draw(&mut self, frame: &mut Frame, snapshot: &LedgerSnapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(HEADER_HEIGHT),
                Constraint::Min(3),
                Constraint::Length(FOOTER_HEIGHT),
            ])
            .split(frame.size());

        ProgressHeader::new(snapshot, &self.title, self.started.elapsed(), &self.colors)
            .render(frame, chunks[0]);

        let rows = chunks[1].height.saturating_sub(2) as usize; // Account for borders
        let visible = self.visible_range(snapshot, rows);
        ItemList::new(snapshot, visible, self.follow, &self.colors).render(frame, chunks[1]);

        SummaryFooter::new(snapshot, self.interrupting, &self.colors).render(frame, chunks[2]);
    }
}

fn max_offset(total: usize, viewport: usize) -> usize {
    total.saturating_sub(viewport.max(1))
}
