//! Metric name definitions, grouped by subsystem.

/// Worker pool and SSH transport metrics.
pub mod workers {
    /// Total number of workers registered.
    pub const REGISTERED_TOTAL: &str = "helix_workers_registered_total";
    /// Number of workers currently marked healthy.
    pub const HEALTHY: &str = "helix_workers_healthy";
    /// Total SSH dial attempts.
    pub const DIAL_ATTEMPTS_TOTAL: &str = "helix_workers_dial_attempts_total";
    /// Total SSH dial failures.
    pub const DIAL_FAILURES_TOTAL: &str = "helix_workers_dial_failures_total";
    /// Remote command execution duration in seconds.
    pub const COMMAND_DURATION_SECONDS: &str = "helix_workers_command_duration_seconds";
    /// Total remote command executions.
    pub const COMMAND_EXECUTIONS_TOTAL: &str = "helix_workers_command_executions_total";
    /// Total remote command execution errors.
    pub const COMMAND_ERRORS_TOTAL: &str = "helix_workers_command_errors_total";
}

/// Task dispatch metrics.
pub mod dispatch {
    /// Total tasks submitted.
    pub const SUBMITTED_TOTAL: &str = "helix_dispatch_submitted_total";
    /// Number of tasks currently queued.
    pub const QUEUE_DEPTH: &str = "helix_dispatch_queue_depth";
    /// Total tasks assigned to a worker.
    pub const ASSIGNED_TOTAL: &str = "helix_dispatch_assigned_total";
    /// Total tasks completed successfully.
    pub const COMPLETED_TOTAL: &str = "helix_dispatch_completed_total";
    /// Total tasks that failed after exhausting retries.
    pub const FAILED_TOTAL: &str = "helix_dispatch_failed_total";
    /// Total task retry attempts.
    pub const RETRIES_TOTAL: &str = "helix_dispatch_retries_total";
    /// Time a task spent queued before assignment, in seconds.
    pub const QUEUE_WAIT_SECONDS: &str = "helix_dispatch_queue_wait_seconds";
}

/// LLM provider routing metrics.
pub mod llm {
    /// Total completions requested.
    pub const COMPLETIONS_TOTAL: &str = "helix_llm_completions_total";
    /// Completion duration in seconds.
    pub const COMPLETION_DURATION_SECONDS: &str = "helix_llm_completion_duration_seconds";
    /// Total input tokens processed.
    pub const INPUT_TOKENS_TOTAL: &str = "helix_llm_input_tokens_total";
    /// Total output tokens generated.
    pub const OUTPUT_TOKENS_TOTAL: &str = "helix_llm_output_tokens_total";
    /// Completion errors.
    pub const COMPLETION_ERRORS_TOTAL: &str = "helix_llm_completion_errors_total";
    /// Provider failovers triggered.
    pub const FAILOVERS_TOTAL: &str = "helix_llm_failovers_total";
    /// Time to first token in seconds (streaming latency).
    pub const TIME_TO_FIRST_TOKEN_SECONDS: &str = "helix_llm_time_to_first_token_seconds";
    /// Vision switch events.
    pub const VISION_SWITCHES_TOTAL: &str = "helix_llm_vision_switches_total";
    /// Observed generation throughput.
    pub const TOKENS_PER_SECOND: &str = "helix_llm_tokens_per_second";
}

/// Sandbox lifecycle metrics.
pub mod sandbox {
    /// Sandboxes currently alive.
    pub const ACTIVE: &str = "helix_sandbox_active";
    /// Total sandboxes created.
    pub const CREATED_TOTAL: &str = "helix_sandbox_created_total";
    /// Total sandboxes evicted by the TTL ticker.
    pub const EVICTED_TOTAL: &str = "helix_sandbox_evicted_total";
    /// Sandboxed command execution duration in seconds.
    pub const COMMAND_DURATION_SECONDS: &str = "helix_sandbox_command_duration_seconds";
    /// Total sandboxed command execution errors.
    pub const COMMAND_ERRORS_TOTAL: &str = "helix_sandbox_command_errors_total";
}

/// Confirmation pipeline metrics.
pub mod confirm {
    /// Total confirmation requests evaluated.
    pub const REQUESTS_TOTAL: &str = "helix_confirm_requests_total";
    /// Total requests auto-allowed without a prompt.
    pub const AUTO_ALLOWED_TOTAL: &str = "helix_confirm_auto_allowed_total";
    /// Total requests that prompted the user.
    pub const PROMPTED_TOTAL: &str = "helix_confirm_prompted_total";
    /// Total requests denied (by policy or by the user).
    pub const DENIED_TOTAL: &str = "helix_confirm_denied_total";
    /// Total prompts that timed out waiting for a decision.
    pub const TIMEOUTS_TOTAL: &str = "helix_confirm_timeouts_total";

    /// Time spent waiting on a user decision, in seconds.
    pub const PROMPT_WAIT_SECONDS: &str = "helix_confirm_prompt_wait_seconds";
}

/// Consensus module metrics.
pub mod consensus {
    /// Total elections started.
    pub const ELECTIONS_TOTAL: &str = "helix_consensus_elections_total";
    /// Current term number.
    pub const TERM: &str = "helix_consensus_term";
    /// Whether this node currently believes it is leader (1.0/0.0).
    pub const IS_LEADER: &str = "helix_consensus_is_leader";
}

/// Standard histogram buckets.
pub mod buckets {
    /// Short operation durations in seconds (worker commands, sandbox exec).
    pub const SHORT_DURATION: [f64; 10] = [
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
    ];

    /// LLM completion durations in seconds (longer tail).
    pub const LLM_DURATION: [f64; 10] =
        [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0];

    /// Time-to-first-token buckets in seconds.
    pub const TTFT: [f64; 8] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0];
}
