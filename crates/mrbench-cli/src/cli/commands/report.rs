use std::fmt::Write as _;

use mrbench_core::report::RunSummary;

use super::{or_dash, print_json};
use crate::cli::args::ReportArgs;
use crate::cli::context::Context;
use crate::exit_codes::EXIT_SUCCESS;

pub fn run(ctx: &Context, args: ReportArgs) -> anyhow::Result<i32> {
    let store = ctx.open_store()?;
    let Some(summary) = RunSummary::load(&store, &args.run_id)? else {
        anyhow::bail!("run not found: {}", args.run_id);
    };

    if args.json {
        print_json(&summary)?;
    } else {
        print!("{}", render_markdown(&summary));
    }
    Ok(EXIT_SUCCESS)
}

fn ms(value: Option<f64>) -> String {
    or_dash(value.map(|v| format!("{v:.1}")))
}

pub(crate) fn render_markdown(summary: &RunSummary) -> String {
    let run = &summary.run;
    let mut out = String::new();
    let _ = writeln!(out, "# Run {}\n", run.id);
    let _ = writeln!(out, "- Status: {}", run.status.as_str());
    let _ = writeln!(out, "- Started: {}", run.created_at);
    let _ = writeln!(out, "- Completed: {}", or_dash(run.completed_at.as_deref()));
    let _ = writeln!(out, "- Suite: {}", or_dash(run.suite_path.as_deref()));
    let _ = writeln!(out, "- Jobs: {}\n", summary.jobs.len());

    let _ = writeln!(out, "## Providers\n");
    let _ = writeln!(
        out,
        "| Provider | Model | Jobs | Completed | Failed | Timeout | Success | Mean ms | Min ms | Max ms | Mean TTFT ms |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|---|---|");
    for p in &summary.providers {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {:.0}% | {} | {} | {} | {} |",
            p.provider,
            p.model,
            p.total,
            p.completed,
            p.failed,
            p.timeout,
            p.success_rate * 100.0,
            ms(p.mean_wall_time_ms),
            ms(p.min_wall_time_ms),
            ms(p.max_wall_time_ms),
            ms(p.mean_ttft_ms)
        );
    }

    let _ = writeln!(out, "\n## Jobs\n");
    let _ = writeln!(out, "| Job | Provider | Model | Status | Wall ms | TTFT ms | Error |");
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    for j in &summary.jobs {
        let error = j.error.as_deref().map(|e| e.replace('|', "\\|").replace('\n', " "));
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            j.job_id,
            j.provider,
            j.model,
            j.status.as_str(),
            ms(j.wall_time_ms),
            ms(j.ttft_ms),
            or_dash(error)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrbench_core::report::{JobLine, ProviderStats};
    use mrbench_core::storage::{JobStatus, RunRow, RunStatus};

    #[test]
    fn markdown_has_provider_and_job_tables() {
        let summary = RunSummary {
            run: RunRow {
                id: "run-1".into(),
                created_at: "2026-01-01T00:00:00.000Z".into(),
                suite_path: Some("suite.yaml".into()),
                config_snapshot: None,
                status: RunStatus::Failed,
                completed_at: None,
            },
            providers: vec![ProviderStats {
                provider: "fake".into(),
                model: "fake-fast".into(),
                total: 2,
                completed: 1,
                failed: 1,
                timeout: 0,
                success_rate: 0.5,
                mean_wall_time_ms: Some(12.0),
                min_wall_time_ms: Some(12.0),
                max_wall_time_ms: Some(12.0),
                mean_ttft_ms: None,
            }],
            jobs: vec![JobLine {
                job_id: "job-1".into(),
                provider: "fake".into(),
                model: "fake-fast".into(),
                status: JobStatus::Failed,
                wall_time_ms: Some(3.0),
                ttft_ms: None,
                error: Some("bad | pipe\nnext".into()),
            }],
        };

        let md = render_markdown(&summary);
        assert!(md.starts_with("# Run run-1\n"));
        assert!(md.contains("- Completed: -"));
        assert!(md.contains("| fake | fake-fast | 2 | 1 | 1 | 0 | 50% | 12.0 | 12.0 | 12.0 | - |"));
        assert!(md.contains("| job-1 | fake | fake-fast | failed | 3.0 | - | bad \\| pipe next |"));
    }
}
