//! tandem: collaborative session core, exercised end to end in one process.
//!
//! Hosts a session, admits simulated guests over in-process links, and
//! walks the access-control surface: gated terminal writes, an access
//! request, a host grant, and the re-verified write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tandem_common::ParticipantId;
use tandem_session::{
    edit, guest_terminal_write, host_terminal_write, silent_sign_in, ApprovalUi,
    ClientCapabilities, Collaborator, GuestProfile, GuestSession, HostSession, JoinDecision,
    MemorySettingsStore, OperationAccessHandler, OperationName, ParticipantContext,
    PostJoinAction, SettingsStore,
};

#[derive(Parser)]
#[command(name = "tandem", about = "Collaborative session core demo")]
struct Args {
    /// Config file path; defaults to the per-user config location.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Number of simulated guests to admit.
    #[arg(short, long, default_value_t = 2)]
    guests: usize,

    /// Host the session in read-only mode.
    #[arg(long)]
    read_only: bool,
}

/// Console-driven host decisions: every join is accepted, every
/// notification dismissed, and shared-terminal access requests granted.
struct ConsoleUi;

#[async_trait]
impl ApprovalUi for ConsoleUi {
    async fn confirm_join(&self, guest: &GuestProfile) -> JoinDecision {
        tracing::info!(guest = %guest.display_name, "approving join request");
        JoinDecision::Accept
    }

    async fn notify_joined(&self, collaborator: &Collaborator) -> PostJoinAction {
        tracing::info!(guest = %collaborator.display_name, "guest joined notification");
        PostJoinAction::Dismiss
    }
}

struct GrantTerminalWrites;

#[async_trait]
impl OperationAccessHandler for GrantTerminalWrites {
    async fn decide(
        &self,
        target: Option<&str>,
        participant: ParticipantId,
    ) -> Result<Option<bool>, String> {
        tracing::info!(target = ?target, participant = %participant, "granting terminal write access");
        Ok(Some(true))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => tandem_config::load_from_path(path),
        None => tandem_config::load_config(),
    };
    let default_filter = loaded
        .as_ref()
        .map(|config| config.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter)),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Config load failed, using defaults: {e}");
        tandem_config::TandemConfig::default()
    });

    // Host side: sign in silently, apply the read-only flag, share.
    let settings = Arc::new(MemorySettingsStore::new()) as Arc<dyn SettingsStore>;
    let host = HostSession::new(config.clone(), settings, Arc::new(ConsoleUi));
    silent_sign_in(
        host.machine(),
        async { true },
        Duration::from_secs(config.signin.silent_timeout_secs),
    )
    .await;

    if args.read_only {
        host.set_read_only(true)
            .await
            .expect("read-only flag should apply before guests connect");
    }
    host.share().await.expect("sharing should start");
    host.approval().register_operation_handler(
        OperationName::WriteToSharedTerminal,
        Arc::new(GrantTerminalWrites),
    );

    // Guests: admit, then keep their replicas pumping.
    let mut guests = Vec::new();
    for n in 0..args.guests {
        let (host_end, mut endpoint) = tandem_session::loopback();
        tokio::spawn(Arc::clone(&host).serve_guest(host_end));

        let guest = GuestSession::new(endpoint.tx.clone());
        silent_sign_in(guest.machine(), async { true }, Duration::from_secs(5)).await;
        let me = guest
            .join(
                &mut endpoint,
                GuestProfile::new(format!("Guest {}", n + 1), format!("guest{}@tandem.dev", n + 1)),
                ClientCapabilities::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("join should be accepted");
        tracing::info!(display_name = %me.display_name, id = %me.id, "guest admitted");
        guest.spawn_pump(endpoint.rx);
        guests.push(guest);
    }

    let Some(first) = guests.first() else {
        tracing::info!("no guests requested, ending session");
        host.end_sharing().await.expect("session should end");
        return;
    };

    // A guest tries to type into the shared terminal. The host-side verify
    // refuses until an access request is granted.
    let host_gate = host.gate().expect("host gate while shared");
    let host_op = host_terminal_write("terminal-1", Arc::clone(host.grants()), &config.terminal);
    let guest_ctx = ParticipantContext::Participant(first.participant_id().expect("joined"));

    match host_gate.verify(&guest_ctx, &host_op) {
        Ok(()) => tracing::info!("terminal write allowed outright"),
        Err(err) => {
            tracing::info!(code = ?err.code(), error = %err, "terminal write refused, requesting access");

            let granted = Arc::new(tokio::sync::Notify::new());
            let signal = Arc::clone(&granted);
            first.requests().events().subscribe(move |event| {
                tracing::info!(event = ?event, "access request resolved");
                signal.notify_one();
            });
            first
                .requests()
                .request_access(OperationName::WriteToSharedTerminal, Some("terminal-1".into()));
            granted.notified().await;

            match host_gate.verify(&guest_ctx, &host_op) {
                Ok(()) => tracing::info!("terminal write allowed after host grant"),
                // In a read-only session the grant cannot override policy.
                Err(err) => tracing::info!(code = ?err.code(), "write still refused: {err}"),
            }

            let guest_gate = first.gate().expect("guest gate while joined");
            let guest_op = guest_terminal_write("terminal-1", Arc::clone(first.grants()));
            let decision = guest_gate
                .evaluate(&first.own_context(), &guest_op)
                .expect("guest-side evaluation");
            tracing::info!(decision = ?decision, "guest-side gate decision");

            let edit_decision = guest_gate
                .evaluate(&first.own_context(), &edit())
                .expect("guest-side evaluation");
            tracing::info!(decision = ?edit_decision, "guest edit decision");
        }
    }

    host.end_sharing().await.expect("session should end");
    for guest in &guests {
        tracing::info!(
            state = ?guest.machine().state(),
            "guest settled after session end"
        );
    }
}
