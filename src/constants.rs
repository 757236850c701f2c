// Dataset schema
pub const SESSION_COLUMN: &str = "sessionUid";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const MAX_SPEED_COLUMN: &str = "maxSpeed";
pub const MOUSE_DOWN_COLUMN: &str = "mouseDown";
pub const FEATURE_COLUMNS: [&str; 4] = ["dotX", "dotY", "mouseX", "mouseY"];
pub const NUM_FEATURES: usize = FEATURE_COLUMNS.len();

// Sequence building
pub const SEQUENCE_LENGTH: usize = 10; // Number of time steps to look back
pub const MIN_SESSION_LENGTH: usize = 20;
pub const SPEED_TO_PIXELS: f64 = 100.0; // maxSpeed -> pixels/second
pub const TARGET_NOISE_FACTOR: f64 = 0.3;

// Model parameters
pub const HIDDEN_SIZE: usize = 64;
pub const OUTPUT_SIZE: usize = 2; // targetVx, targetVy
pub const DROPOUT: f64 = 0.2;

// Training
pub const VALIDATION_SPLIT_RATIO: f64 = 0.2; // 20% of data for validation
pub const BATCH_SIZE: usize = 64;
pub const EPOCHS: usize = 30;
pub const LEARNING_RATE: f64 = 0.001;
pub const WEIGHT_DECAY: f64 = 1e-5;
pub const ADAM_EPSILON: f32 = 1e-8;
pub const GRAD_CLIP_NORM: f64 = 1.0;
pub const LR_PATIENCE: usize = 5;
pub const LR_FACTOR: f64 = 0.5;
pub const LR_THRESHOLD: f64 = 1e-4; // relative improvement needed to reset patience
pub const DEFAULT_SEED: u64 = 42;

// Graph contract
pub const HISTORY_INPUT: &str = "history";
pub const CONFIG_INPUT: &str = "config";
pub const VX_OUTPUT: &str = "targetVx";
pub const VY_OUTPUT: &str = "targetVy";
pub const SEQ_LEN_DIM: &str = "seq_len";
pub const IR_VERSION: i64 = 9;
pub const OPSET_VERSION: i64 = 14;

// Artifact paths
pub const DATA_PATH: &str = "data/game_dataset.parquet";
pub const MODEL_PATH: &str = "public/lstm_dot_behavior.onnx";
pub const PLACEHOLDER_PATH: &str = "public/dummy_dot_behavior.onnx";
