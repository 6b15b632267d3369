pub mod state_files;
