mod dispatcher_test;
mod scenarios_test;
mod transport_test;
