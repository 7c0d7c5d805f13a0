//! The blockchain lifecycle state machine.
//!
//! Transitions are a static table: [`transition`] maps a state and an event
//! to the next state and the actions to run. The table is pure; committing
//! the state and running actions is [`Blockchain::dispatch`]'s job.
//!
//! [`Blockchain::dispatch`]: crate::Blockchain::dispatch

use std::fmt;

/// Phases of the network sync sub-machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Syncing,
    DownloadingBlocks,
    DownloadFinished,
    DownloadPaused,
    ProcessFinished,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockchainState {
    Uninitialized,
    Bootstrapping,
    SyncingWithNetwork(SyncPhase),
    Idle,
    ProcessingNewBlock,
    ForkDetected,
    ForkRecovery,
    Terminating,
}

impl BlockchainState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, BlockchainState::SyncingWithNetwork(_))
    }
}

impl fmt::Display for BlockchainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainState::Uninitialized => f.write_str("uninitialised"),
            BlockchainState::Bootstrapping => f.write_str("init"),
            BlockchainState::SyncingWithNetwork(phase) => {
                let phase = match phase {
                    SyncPhase::Syncing => "syncing",
                    SyncPhase::DownloadingBlocks => "downloadBlocks",
                    SyncPhase::DownloadFinished => "downloadFinished",
                    SyncPhase::DownloadPaused => "downloadPaused",
                    SyncPhase::ProcessFinished => "processFinished",
                    SyncPhase::End => "end",
                };
                write!(f, "syncWithNetwork.{phase}")
            }
            BlockchainState::Idle => f.write_str("idle"),
            BlockchainState::ProcessingNewBlock => f.write_str("newBlock"),
            BlockchainState::ForkDetected => f.write_str("fork"),
            BlockchainState::ForkRecovery => f.write_str("forkRecovery"),
            BlockchainState::Terminating => f.write_str("stopped"),
        }
    }
}

/// Everything that can move the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    Started,
    Rollback,
    Success,
    Failure,
    Stop,
    Synced,
    NotSynced,
    Paused,
    NetworkHalted,
    Downloaded,
    NoBlock,
    ProcessFinished,
    SyncFinished,
    Wakeup,
    NewBlock,
    Fork,
    Recover,
    NoFork,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Start => "START",
            Event::Started => "STARTED",
            Event::Rollback => "ROLLBACK",
            Event::Success => "SUCCESS",
            Event::Failure => "FAILURE",
            Event::Stop => "STOP",
            Event::Synced => "SYNCED",
            Event::NotSynced => "NOTSYNCED",
            Event::Paused => "PAUSED",
            Event::NetworkHalted => "NETWORKHALTED",
            Event::Downloaded => "DOWNLOADED",
            Event::NoBlock => "NOBLOCK",
            Event::ProcessFinished => "PROCESSFINISHED",
            Event::SyncFinished => "SYNCFINISHED",
            Event::Wakeup => "WAKEUP",
            Event::NewBlock => "NEWBLOCK",
            Event::Fork => "FORK",
            Event::Recover => "RECOVER",
            Event::NoFork => "NOFORK",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions a transition can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Init,
    RollbackDatabase,
    BlockchainReady,
    CheckLater,
    CheckLastBlockSynced,
    CheckLastDownloadedBlockSynced,
    DownloadBlocks,
    DownloadFinished,
    DownloadPaused,
    Stopped,
    SyncingComplete,
    ConfirmFork,
    StartForkRecovery,
    ExitApp,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Init => "init",
            ActionKind::RollbackDatabase => "rollbackDatabase",
            ActionKind::BlockchainReady => "blockchainReady",
            ActionKind::CheckLater => "checkLater",
            ActionKind::CheckLastBlockSynced => "checkLastBlockSynced",
            ActionKind::CheckLastDownloadedBlockSynced => "checkLastDownloadedBlockSynced",
            ActionKind::DownloadBlocks => "downloadBlocks",
            ActionKind::DownloadFinished => "downloadFinished",
            ActionKind::DownloadPaused => "downloadPaused",
            ActionKind::Stopped => "stopped",
            ActionKind::SyncingComplete => "syncingComplete",
            ActionKind::ConfirmFork => "checkIfForked",
            ActionKind::StartForkRecovery => "startForkRecovery",
            ActionKind::ExitApp => "exitApp",
        };
        f.write_str(name)
    }
}

type Step = (BlockchainState, &'static [ActionKind]);

/// Look up the transition for `event` in `state`. `None` means the event is
/// ignored there.
pub fn transition(state: BlockchainState, event: Event) -> Option<Step> {
    use ActionKind as A;
    use BlockchainState as S;
    use Event as E;
    use SyncPhase as P;

    const SYNC: S = S::SyncingWithNetwork(P::Syncing);
    const CHECK_DOWNLOADED: &[ActionKind] = &[A::CheckLastDownloadedBlockSynced];
    const READY: &[ActionKind] = &[A::CheckLater, A::BlockchainReady];

    if event == E::Stop {
        return match state {
            S::Terminating => None,
            _ => Some((S::Terminating, &[A::Stopped])),
        };
    }

    let step: Step = match (state, event) {
        (S::Uninitialized, E::Start) => (S::Bootstrapping, &[A::Init]),

        (S::Bootstrapping, E::Started) => (SYNC, CHECK_DOWNLOADED),
        (S::Bootstrapping, E::Rollback) => (S::Bootstrapping, &[A::RollbackDatabase]),
        (S::Bootstrapping, E::Success) => (S::Bootstrapping, &[A::Init]),
        (S::Bootstrapping, E::Failure) => (S::Terminating, &[A::ExitApp]),

        (S::SyncingWithNetwork(_), E::SyncFinished) => (S::Idle, READY),
        (S::SyncingWithNetwork(_), E::Fork) => (S::ForkDetected, &[A::ConfirmFork]),
        (S::SyncingWithNetwork(phase), event) => return sync_transition(phase, event),

        (S::Idle, E::Wakeup) => (SYNC, CHECK_DOWNLOADED),
        (S::Idle, E::NewBlock) => (S::ProcessingNewBlock, &[]),
        (S::Idle, E::Fork) => (S::ForkDetected, &[A::ConfirmFork]),

        (S::ProcessingNewBlock, E::ProcessFinished) => (S::Idle, READY),
        (S::ProcessingNewBlock, E::Fork) => (S::ForkDetected, &[A::ConfirmFork]),

        (S::ForkDetected, E::Recover) => (S::ForkRecovery, &[A::StartForkRecovery]),
        (S::ForkDetected, E::NoFork) => (SYNC, CHECK_DOWNLOADED),

        (S::ForkRecovery, E::Success | E::Failure) => (SYNC, CHECK_DOWNLOADED),

        _ => return None,
    };
    Some(step)
}

fn sync_transition(phase: SyncPhase, event: Event) -> Option<Step> {
    use ActionKind as A;
    use Event as E;
    use SyncPhase as P;

    let (next, actions): (SyncPhase, &'static [ActionKind]) = match (phase, event) {
        (P::Syncing, E::Synced) => (P::DownloadFinished, &[A::DownloadFinished]),
        (P::Syncing, E::NotSynced) => (P::DownloadingBlocks, &[A::DownloadBlocks]),
        (P::Syncing, E::Paused) => (P::DownloadPaused, &[A::DownloadPaused]),
        (P::Syncing, E::NetworkHalted) => (P::End, &[A::SyncingComplete]),

        (P::DownloadingBlocks, E::Downloaded | E::NoBlock) => {
            (P::Syncing, &[A::CheckLastDownloadedBlockSynced])
        }
        (P::DownloadingBlocks, E::ProcessFinished) => {
            (P::DownloadFinished, &[A::DownloadFinished])
        }

        (P::DownloadFinished | P::DownloadPaused, E::ProcessFinished) => {
            (P::ProcessFinished, &[A::CheckLastBlockSynced])
        }

        (P::ProcessFinished, E::Synced) => (P::End, &[A::SyncingComplete]),
        (P::ProcessFinished, E::NotSynced) => (P::DownloadingBlocks, &[A::DownloadBlocks]),

        _ => return None,
    };
    Some((BlockchainState::SyncingWithNetwork(next), actions))
}
