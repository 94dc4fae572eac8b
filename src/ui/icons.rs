//! Shared UI icons, with plain-text fallbacks for terminals without emoji.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PARALLEL: Emoji<'_, '_> = Emoji("🔀 ", "[||]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static GAUGE: Emoji<'_, '_> = Emoji("📏 ", "[Q]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
