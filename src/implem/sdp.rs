/// Session description announced on the SDP route. It never changes: one H.264
/// video track on payload type 96, no negotiation.
pub const SESSION_DESCRIPTION: &str = concat!(
	"v=0\r\n",
	"o=- 1 1 IN IP4 127.0.0.1\r\n",
	"s=Camera Stream\r\n",
	"c=IN IP4 0.0.0.0\r\n",
	"t=0 0\r\n",
	"m=video 0 RTP/AVP 96\r\n",
	"a=rtpmap:96 H264/90000\r\n",
	"a=fmtp:96 profile-level-id=42e01f\r\n",
	"a=control:track1\r\n",
);

pub const SDP_CONTENT_TYPE: &str = "application/sdp";
