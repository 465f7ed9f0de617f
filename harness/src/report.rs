//! End-of-run summary

use std::fmt::Write;

use crate::runner::{RunOutcome, RunReport};
use crate::stats::LatencyDistribution;

const RULE: &str = "═══════════════════════════════════════════════════════════════";

fn fmt_ms(value: Option<f64>) -> String {
    match value {
        Some(v) if v >= 1000.0 => format!("{:.2}s", v / 1000.0),
        Some(v) => format!("{:.2}ms", v),
        None => "-".to_string(),
    }
}

fn latency_line(dist: &LatencyDistribution) -> String {
    format!(
        "avg={} min={} med={} max={} p(90)={} p(95)={}",
        fmt_ms(dist.avg_ms()),
        fmt_ms(dist.min_ms()),
        fmt_ms(dist.med_ms()),
        fmt_ms(dist.max_ms()),
        fmt_ms(dist.percentile_ms(90.0)),
        fmt_ms(dist.percentile_ms(95.0)),
    )
}

/// Render the human readable summary of a finished run
pub fn render_summary(report: &RunReport) -> String {
    let m = &report.metrics;
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        " RUN {} ({:.1}s)",
        report.run_id,
        report.duration.as_secs_f64()
    );
    let _ = writeln!(out, "{}", RULE);

    let _ = writeln!(out);
    let _ = writeln!(out, " ─── Scenarios ───────────────────────────────────────────────");
    for s in &report.scenarios {
        let _ = writeln!(
            out,
            "   {:20} {:14} max {:>5} VUs  interrupted {:>4}{}",
            s.name,
            s.executor,
            s.max_vus,
            s.interrupted,
            if s.stopped_early { "  (stopped early)" } else { "" }
        );
    }

    if !m.checks.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, " ─── Checks ──────────────────────────────────────────────────");
        for (name, tally) in &m.checks {
            let mark = if tally.fails == 0 { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "   {} {:30} {:>8} ✓ / {:>8} ✗",
                mark, name, tally.passes, tally.fails
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, " ─── Metrics ─────────────────────────────────────────────────");
    let _ = writeln!(
        out,
        "   {:20} {:.2}% ({} / {})",
        "checks",
        m.checks_rate() * 100.0,
        m.checks_passed,
        m.checks_passed + m.checks_failed
    );
    let _ = writeln!(
        out,
        "   {:20} {}",
        "http_req_duration",
        latency_line(&m.http_req_duration)
    );
    let _ = writeln!(
        out,
        "   {:20} {:.2}% ({} / {})",
        "http_req_failed",
        m.failed_rate() * 100.0,
        m.http_req_failed,
        m.http_reqs
    );
    let _ = writeln!(
        out,
        "   {:20} {} ({:.1}/s)",
        "http_reqs",
        m.http_reqs,
        m.http_reqs_per_sec()
    );
    let _ = writeln!(
        out,
        "   {:20} {} ({:.1}/s), {} interrupted",
        "iterations",
        m.iterations,
        m.iterations_per_sec(),
        m.interrupted_iterations
    );
    let _ = writeln!(out, "   {:20} {} (min {}, max {})", "vus", m.vus, m.vus_min, m.vus_max);

    if !m.statuses.is_empty() || !m.errors.is_empty() {
        let statuses = m
            .statuses
            .iter()
            .map(|(code, count)| format!("{}={}", code, count))
            .chain(m.errors.iter().map(|(kind, count)| format!("{}={}", kind, count)))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(out, "   {:20} {}", "responses", statuses);
    }

    if !report.thresholds.outcomes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, " ─── Thresholds ──────────────────────────────────────────────");
        for t in &report.thresholds.outcomes {
            let observed = t
                .observed
                .map(|v| format!("{:.3}", v))
                .unwrap_or_else(|| "no data".to_string());
            let _ = writeln!(
                out,
                "   {} {:20} {:16} (observed {})",
                if t.passed { "PASS" } else { "FAIL" },
                t.metric,
                t.expression,
                observed
            );
        }
    }

    let overall = match &report.outcome {
        RunOutcome::Passed => "PASS".to_string(),
        RunOutcome::ThresholdsFailed => "FAIL (thresholds crossed)".to_string(),
        RunOutcome::AbortedByThreshold { metric, expression } => {
            format!("FAIL (aborted: {} '{}' crossed)", metric, expression)
        }
        RunOutcome::Interrupted => "FAIL (interrupted)".to_string(),
    };

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, " OVERALL: {}", overall);
    let _ = writeln!(out, "{}", RULE);
    out
}

/// Print the summary to stdout
pub fn print_summary(report: &RunReport) {
    println!("{}", render_summary(report));
}
