//! 运行结果.

use std::io::{self, Write};

use syn_berry::PageReport;

/// 将一页的报告写进 `w` 中.
fn describe_into<W: Write>(r: &PageReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    write!(w, "Page {}", r.page)?;
    if r.cached {
        write!(w, " (cached)")?;
    }
    writeln!(w, ":")?;
    writeln!(w, "{S4}Succeeded: {}", r.succeeded)?;
    write!(w, "{S4}Dropped: {}", r.dropped.len())?;
    for (index, reason) in &r.dropped {
        write!(w, "\n{S4}{S4}#{index}: {reason}")?;
    }
    Ok(())
}

/// 一次运行的最终结果.
pub struct RunResult {
    total: usize,
    pages: Vec<PageReport>,
}

impl RunResult {
    pub fn new(total: usize, pages: Vec<PageReport>) -> Self {
        Self { total, pages }
    }

    /// 成功渲染的实例数.
    pub fn succeeded(&self) -> usize {
        self.pages.iter().map(|p| p.succeeded).sum()
    }

    /// 有实例但一个都没有成功.
    pub fn all_dropped(&self) -> bool {
        self.total > 0 && self.succeeded() == 0
    }

    /// 打印运行结果.
    pub fn analyze(&self) {
        let stdout = io::stdout();
        let mut w = stdout.lock();
        let _ = self.write_into(&mut w);
    }

    fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        utils::sep_to(&mut *w)?;
        for page in &self.pages {
            describe_into(page, w)?;
            writeln!(w)?;
            utils::sep_to(&mut *w)?;
        }
        writeln!(w, "Total: {} / {} succeeded", self.succeeded(), self.total)
    }
}
