//! 章节抓取进度条。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub struct ChapterProgress {
    bar: Option<ProgressBar>,
}

impl ChapterProgress {
    /// verbose 模式逐章输出日志，不再显示进度条。
    pub fn new(total: usize, enabled: bool) -> Self {
        if !enabled || total == 0 {
            return Self::hidden();
        }
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        bar.set_style(style);
        bar.set_prefix("章节下载");
        Self { bar: Some(bar) }
    }

    pub fn hidden() -> Self {
        Self { bar: None }
    }

    pub fn inc(&self) {
        if let Some(bar) = self.bar.as_ref() {
            bar.inc(1);
        }
    }

    pub fn set_message(&self, title: &str) {
        if let Some(bar) = self.bar.as_ref() {
            bar.set_message(title.to_string());
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
