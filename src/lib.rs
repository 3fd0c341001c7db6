//! Coherence viewer: pick two channel groups, estimate magnitude-squared
//! coherence for every cross-group pair on a processing thread, and plot one
//! pair (or the average of all pairs) on the UI side.

pub mod backend;
pub mod channel_groups;
pub mod coherence;
pub mod combinations;
pub mod numeric_field;
pub mod panel;
pub mod plot;
pub mod presets;
pub mod refresh;
pub mod signal;
pub mod snapshot;
pub mod utils;
pub mod viewer;

pub use backend::{FrequencyAxis, Parameter, ProcessingBackend};
pub use channel_groups::{ChannelSet, Group};
pub use coherence::{CoherenceNode, CoherenceProcessor, CoherenceSettings, NodeConfig};
pub use combinations::{Combination, CombinationList, Selection, SelectionError};
pub use panel::{CoherencePanel, PanelStatus, Weighting};
pub use plot::{CoherencePlot, LogPlot, PlotSurface};
pub use refresh::{RefreshController, TickOutcome};
pub use snapshot::{snapshot_channel, CoherenceMatrix, MatrixError, SnapshotReader, SnapshotWriter};
