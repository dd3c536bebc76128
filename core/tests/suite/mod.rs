mod http_session;
