pub mod constants;
pub mod error;
pub mod lstm {
    pub mod step_1_tensor_preparation;
    pub mod step_2_lstm_cell;
    pub mod step_3_lstm_model_arch;
    pub mod step_4_train_model;
    pub mod step_5_prediction;
    pub mod step_6_model_serialization;
}
pub mod util {
    pub mod feature_engineering;
    pub mod file_utils;
    pub mod pre_processor;
    pub mod scaling;
    #[cfg(test)]
    pub mod test_utils;
}
