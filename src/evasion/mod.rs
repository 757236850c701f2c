/// # Dot Evasion Model Module
///
/// This module trains a single-layer LSTM that maps a short history of dot and
/// cursor positions, plus the session's max speed, to the velocity the dot
/// should take to get away from the cursor.
///
/// ## Module Structure:
///
/// 1. **step_1_sequence_preparation**: Session grouping, sliding windows and synthetic escape-velocity targets
/// 2. **step_2_lstm_cell**: Seeded LSTM cell with packed gate projections
/// 3. **step_3_evasion_model_arch**: LSTM encoder plus config-conditioned linear head
/// 4. **step_4_train_model**: Training loop with clipping, weight decay and plateau scheduling
/// 5. **step_5_prediction**: Raw-unit prediction over a trained model and its scalers
/// 6. **step_6_graph_export**: Lowering to the dynamic-shape inference graph
///
pub mod step_1_sequence_preparation;
pub mod step_2_lstm_cell;
pub mod step_3_evasion_model_arch;
pub mod step_4_train_model;
pub mod step_5_prediction;
pub mod step_6_graph_export;
