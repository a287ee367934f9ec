pub mod exit {
    /// Sentinel for "exit code not yet known".
    pub const UNSET: i32 = -1;
    /// Used when a submission could not be carried out at all, and for
    /// force-terminating an unfinished instance at shutdown.
    pub const SUBMIT_FAILURE: i32 = 255;
    pub const SHUTDOWN: i32 = 255;
}

pub mod wait {
    /// Maximum number of job ids folded into one wait request, to respect
    /// scheduler command-line length limits.
    pub const PAGE_SIZE: usize = 100;
}

pub mod markers {
    /// Engine-private directory inside a step's work directory.
    pub const ENGINE_DIR: &str = ".skein";
    /// Output descriptor; its presence makes output capture idempotent.
    pub const OUTPUTS: &str = "outputs.json";
}

pub mod container {
    /// Exported to container-enabled resubmissions so the wrapper entry
    /// point knows which image to launch.
    pub const IMAGE_ENV: &str = "SKEIN_CONTAINER_IMAGE";
}

pub mod recovery_env {
    pub const JOB_ID: &str = "SKEIN_JOB_ID";
    pub const JOB_COMMAND: &str = "SKEIN_JOB_COMMAND";
    pub const JOB_CWD: &str = "SKEIN_JOB_CWD";
    pub const JOB_OUTDIR: &str = "SKEIN_JOB_OUTDIR";
    pub const JOB_RESREQ: &str = "SKEIN_JOB_RESREQ";
    pub const RETRY_INDEX: &str = "SKEIN_RETRY_INDEX";
}
