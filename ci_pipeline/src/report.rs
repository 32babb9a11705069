//! Build report accumulation.
//!
//! Producers push lines through a bounded queue; a single consumer task
//! appends them in arrival order. [`ReportCollector::finish`] waits until
//! every producer is gone and the queue is drained.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 256;

/// Producer handle. Cheap to clone; the report closes when all are dropped.
#[derive(Clone, Debug)]
pub struct Reporter {
    tx: mpsc::Sender<String>,
}

impl Reporter {
    pub async fn line(&self, line: impl Into<String>) {
        // only fails once the consumer is gone, i.e. after finish()
        let _ = self.tx.send(line.into()).await;
    }

    /// Push a multi-line block (command output) line by line.
    pub async fn block(&self, text: &str) {
        for line in text.lines() {
            self.line(line).await;
        }
    }

    pub async fn stage(&self, name: impl std::fmt::Display) {
        self.line(format!("==> {name}")).await;
    }
}

pub struct ReportCollector {
    tx: mpsc::Sender<String>,
    consumer: JoinHandle<String>,
}

impl ReportCollector {
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let consumer = tokio::spawn(async move {
            let mut report = String::new();
            while let Some(line) = rx.recv().await {
                report.push_str(&line);
                report.push('\n');
            }
            report
        });
        Self { tx, consumer }
    }

    pub fn reporter(&self) -> Reporter {
        Reporter {
            tx: self.tx.clone(),
        }
    }

    /// Close the queue and return the full report.
    ///
    /// Every [`Reporter`] handed out must be dropped before this resolves.
    pub async fn finish(self) -> String {
        drop(self.tx);
        match self.consumer.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("report consumer task failed: {e}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_arrive_in_order() {
        let collector = ReportCollector::start();
        let reporter = collector.reporter();
        reporter.stage("build").await;
        reporter.block("one\ntwo").await;
        reporter.line("three").await;
        drop(reporter);

        assert_eq!(collector.finish().await, "==> build\none\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn drains_lines_from_concurrent_producers() {
        let collector = ReportCollector::start();
        let mut tasks = Vec::new();
        for worker in 0..4 {
            let reporter = collector.reporter();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    reporter.line(format!("w{worker}-{i}")).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let report = collector.finish().await;
        assert_eq!(report.lines().count(), 2000);
        // per-producer order is preserved
        let w2: Vec<&str> = report.lines().filter(|l| l.starts_with("w2-")).collect();
        assert_eq!(w2.first(), Some(&"w2-0"));
        assert_eq!(w2.last(), Some(&"w2-499"));
    }

    #[tokio::test]
    async fn last_producer_racing_shutdown_is_not_lost() {
        let collector = ReportCollector::start();
        let reporter = collector.reporter();
        let producer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            reporter.line("late line").await;
        });
        let report = collector.finish().await;
        producer.await.unwrap();
        assert_eq!(report, "late line\n");
    }
}
