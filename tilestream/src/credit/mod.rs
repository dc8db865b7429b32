//! Attribution tracking for rendered content.
//!
//! Data providers require their attribution text to appear while their
//! tiles are on screen. Credits are interned once and referenced per
//! frame; the embedding application asks each frame which credits newly
//! need showing and which can be hidden, so it only touches its UI when
//! the set actually changes.

use std::collections::HashMap;

/// Interned handle to one attribution string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Credit(usize);

#[derive(Debug)]
struct CreditRecord {
    html: String,
    show_on_screen: bool,
    last_referenced_frame: Option<u64>,
}

/// Frame-scoped registry of attribution credits.
#[derive(Debug, Default)]
pub struct CreditSystem {
    records: Vec<CreditRecord>,
    by_html: HashMap<String, Credit>,
    current_frame: u64,
    shown_last_frame: Vec<Credit>,
}

impl CreditSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a credit, returning the existing handle for repeated text.
    pub fn create_credit(&mut self, html: impl Into<String>, show_on_screen: bool) -> Credit {
        let html = html.into();
        if let Some(credit) = self.by_html.get(&html) {
            return *credit;
        }
        let credit = Credit(self.records.len());
        self.records.push(CreditRecord {
            html: html.clone(),
            show_on_screen,
            last_referenced_frame: None,
        });
        self.by_html.insert(html, credit);
        credit
    }

    /// The attribution text behind a handle.
    pub fn html(&self, credit: Credit) -> &str {
        &self.records[credit.0].html
    }

    pub fn show_on_screen(&self, credit: Credit) -> bool {
        self.records[credit.0].show_on_screen
    }

    /// Starts a new frame; references from the previous frame become the
    /// baseline for this frame's show/hide deltas.
    pub fn begin_frame(&mut self) {
        self.shown_last_frame = self.credits_referenced_this_frame();
        self.current_frame += 1;
    }

    /// Marks a credit as backing content used this frame.
    pub fn add_credit_reference(&mut self, credit: Credit) {
        self.records[credit.0].last_referenced_frame = Some(self.current_frame);
    }

    fn credits_referenced_this_frame(&self) -> Vec<Credit> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.last_referenced_frame == Some(self.current_frame))
            .map(|(index, _)| Credit(index))
            .collect()
    }

    /// Credits referenced this frame, in creation order.
    pub fn credits_to_show(&self) -> Vec<Credit> {
        self.credits_referenced_this_frame()
    }

    /// Credits shown last frame but not referenced this frame.
    pub fn credits_to_no_longer_show(&self) -> Vec<Credit> {
        self.shown_last_frame
            .iter()
            .copied()
            .filter(|credit| {
                self.records[credit.0].last_referenced_frame != Some(self.current_frame)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_credit_interns_duplicates() {
        let mut credits = CreditSystem::new();
        let a = credits.create_credit("Data by A", true);
        let b = credits.create_credit("Data by A", true);
        let c = credits.create_credit("Data by C", false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(credits.html(c), "Data by C");
        assert!(!credits.show_on_screen(c));
    }

    #[test]
    fn test_show_and_hide_deltas_across_frames() {
        let mut credits = CreditSystem::new();
        let a = credits.create_credit("A", true);
        let b = credits.create_credit("B", true);

        credits.begin_frame();
        credits.add_credit_reference(a);
        credits.add_credit_reference(b);
        assert_eq!(credits.credits_to_show(), vec![a, b]);
        assert!(credits.credits_to_no_longer_show().is_empty());

        // Next frame only A is referenced; B must be hidden.
        credits.begin_frame();
        credits.add_credit_reference(a);
        assert_eq!(credits.credits_to_show(), vec![a]);
        assert_eq!(credits.credits_to_no_longer_show(), vec![b]);

        // A frame referencing nothing hides A too.
        credits.begin_frame();
        assert!(credits.credits_to_show().is_empty());
        assert_eq!(credits.credits_to_no_longer_show(), vec![a]);
    }

    #[test]
    fn test_stale_references_do_not_leak_into_new_frames() {
        let mut credits = CreditSystem::new();
        let a = credits.create_credit("A", true);
        credits.begin_frame();
        credits.add_credit_reference(a);
        credits.begin_frame();
        credits.begin_frame();
        assert!(credits.credits_to_show().is_empty());
        assert!(credits.credits_to_no_longer_show().is_empty());
    }
}
