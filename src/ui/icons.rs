//! Shared UI icons.
//!
//! Each emoji has a plain-text fallback for terminals without unicode support.

use console::Emoji;

// Outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[X]");

// Progress
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[>]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
