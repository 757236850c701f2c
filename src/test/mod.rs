pub mod test_pipeline;
