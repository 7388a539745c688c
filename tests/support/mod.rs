pub mod mock_plugin;
